use crate::sheet::Sheet;
use crate::sheet_name::sheet_names_eq;
use serde::{Deserialize, Serialize};

/// Workbook classification; larger tiers get tighter batch and scan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkbookTier {
    #[default]
    Standard,
    Large,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workbook {
    pub id: String,
    #[serde(default)]
    pub tier: WorkbookTier,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(id: impl Into<String>, sheets: Vec<Sheet>) -> Self {
        Self {
            id: id.into(),
            tier: WorkbookTier::Standard,
            sheets,
        }
    }

    pub fn with_tier(mut self, tier: WorkbookTier) -> Self {
        self.tier = tier;
        self
    }
}

/// Locate a sheet by id first, then by case-insensitive name.
pub fn resolve_sheet_index(sheets: &[Sheet], target: &str) -> Option<usize> {
    sheets
        .iter()
        .position(|s| s.id == target)
        .or_else(|| sheets.iter().position(|s| sheet_names_eq(&s.name, target)))
}

pub fn resolve_sheet<'a>(sheets: &'a [Sheet], target: &str) -> Option<&'a Sheet> {
    resolve_sheet_index(sheets, target).map(|idx| &sheets[idx])
}
