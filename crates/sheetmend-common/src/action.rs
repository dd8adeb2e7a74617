//! The closed set of mutation actions and the batch envelope around them.

use crate::address::{CellAddr, RangeAddr};
use crate::sheet::CellFormat;
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn default_true() -> bool {
    true
}

/// One proposed mutation. Sheet targets (`sheet_id`) resolve by id first and
/// then by case-insensitive name, so a batch may address a sheet it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Action {
    SetCell {
        sheet_id: String,
        cell: CellAddr,
        #[serde(default)]
        value: CellValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
    },
    SetRange {
        sheet_id: String,
        range: RangeAddr,
        values: Vec<Vec<CellValue>>,
    },
    CreateSheet {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheet_id: Option<String>,
    },
    DeleteSheet {
        sheet_id: String,
    },
    RenameSheet {
        sheet_id: String,
        new_name: String,
    },
    FormatCells {
        sheet_id: String,
        range: RangeAddr,
        format: CellFormat,
    },
    InsertRows {
        sheet_id: String,
        at: u32,
        count: u32,
    },
    DeleteRows {
        sheet_id: String,
        at: u32,
        count: u32,
    },
    InsertCols {
        sheet_id: String,
        at: u32,
        count: u32,
    },
    DeleteCols {
        sheet_id: String,
        at: u32,
        count: u32,
    },
    SortRange {
        sheet_id: String,
        range: RangeAddr,
        /// Absolute zero-based column holding the sort key.
        column: u32,
        #[serde(default = "default_true")]
        ascending: bool,
    },
    MergeCells {
        sheet_id: String,
        range: RangeAddr,
    },
    UnmergeCells {
        sheet_id: String,
        range: RangeAddr,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SetCell { .. } => "SET_CELL",
            Action::SetRange { .. } => "SET_RANGE",
            Action::CreateSheet { .. } => "CREATE_SHEET",
            Action::DeleteSheet { .. } => "DELETE_SHEET",
            Action::RenameSheet { .. } => "RENAME_SHEET",
            Action::FormatCells { .. } => "FORMAT_CELLS",
            Action::InsertRows { .. } => "INSERT_ROWS",
            Action::DeleteRows { .. } => "DELETE_ROWS",
            Action::InsertCols { .. } => "INSERT_COLS",
            Action::DeleteCols { .. } => "DELETE_COLS",
            Action::SortRange { .. } => "SORT_RANGE",
            Action::MergeCells { .. } => "MERGE_CELLS",
            Action::UnmergeCells { .. } => "UNMERGE_CELLS",
        }
    }

    /// Sheet the action operates on; `None` for CREATE_SHEET.
    pub fn sheet_target(&self) -> Option<&str> {
        match self {
            Action::CreateSheet { .. } => None,
            Action::SetCell { sheet_id, .. }
            | Action::SetRange { sheet_id, .. }
            | Action::DeleteSheet { sheet_id }
            | Action::RenameSheet { sheet_id, .. }
            | Action::FormatCells { sheet_id, .. }
            | Action::InsertRows { sheet_id, .. }
            | Action::DeleteRows { sheet_id, .. }
            | Action::InsertCols { sheet_id, .. }
            | Action::DeleteCols { sheet_id, .. }
            | Action::SortRange { sheet_id, .. }
            | Action::MergeCells { sheet_id, .. }
            | Action::UnmergeCells { sheet_id, .. } => Some(sheet_id),
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Action::InsertRows { .. }
                | Action::DeleteRows { .. }
                | Action::InsertCols { .. }
                | Action::DeleteCols { .. }
                | Action::SortRange { .. }
        )
    }

    /// Concrete cells whose content this action writes, when resolvable.
    pub fn touched_range(&self) -> Option<RangeAddr> {
        match self {
            Action::SetCell { cell, .. } => Some(RangeAddr::cell(*cell)),
            Action::SetRange { range, values, .. } => {
                let height = values.len() as u32;
                let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
                RangeAddr::from_shape(range.start, height, width)
            }
            Action::SortRange { range, .. } => Some(*range),
            _ => None,
        }
    }

    pub fn writes_formula(&self) -> bool {
        match self {
            Action::SetCell { formula, value, .. } => {
                formula.is_some() || value.formula_text().is_some()
            }
            Action::SetRange { values, .. } => values
                .iter()
                .flatten()
                .any(|v| v.formula_text().is_some()),
            _ => false,
        }
    }
}

/// Who produced a batch. Only `Ai` batches are serialized by the guard and
/// checked for stale base revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchSource {
    #[default]
    User,
    Ai,
    System,
}

impl fmt::Display for BatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchSource::User => "user",
            BatchSource::Ai => "ai",
            BatchSource::System => "system",
        })
    }
}

/// Revision the caller believes is current.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetRevision {
    #[default]
    Latest,
    /// The caller started from an empty history.
    Initial,
    Id(String),
}

impl From<String> for TargetRevision {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "latest" => TargetRevision::Latest,
            "initial" => TargetRevision::Initial,
            _ => TargetRevision::Id(s),
        }
    }
}

impl From<TargetRevision> for String {
    fn from(t: TargetRevision) -> Self {
        match t {
            TargetRevision::Latest => "latest".to_string(),
            TargetRevision::Initial => "initial".to_string(),
            TargetRevision::Id(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBatch {
    pub workbook_id: String,
    #[serde(default)]
    pub target_revision: TargetRevision,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub source: BatchSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ActionBatch {
    pub fn new(workbook_id: impl Into<String>, source: BatchSource, actions: Vec<Action>) -> Self {
        Self {
            workbook_id: workbook_id.into(),
            source,
            actions,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: TargetRevision) -> Self {
        self.target_revision = target;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
