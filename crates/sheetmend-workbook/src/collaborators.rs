//! Seams to the world outside the mutation core, with in-memory versions.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sheetmend_common::{Action, Sheet, Workbook};
use std::error::Error;

/// Supplies a workbook's initial sheets on a cache miss (upload parser,
/// blank-workbook creator, ...).
pub trait SheetSource: Send + Sync {
    fn load(&self, workbook_id: &str) -> Option<Workbook>;
}

/// Write-through cache of the canonical model.
pub trait WorkbookCache: Send + Sync {
    fn get_sheets(&self, workbook_id: &str) -> Option<Vec<Sheet>>;

    fn update_cached_sheets(&self, workbook_id: &str, sheets: Vec<Sheet>);

    fn evict_cache(&self, workbook_id: &str);
}

pub type CorrectionError = Box<dyn Error + Send + Sync>;

/// Escalation hook for formula problems the local rules could not fix.
pub trait CorrectionCallback: Send + Sync {
    fn request_corrections(
        &self,
        error_description: &str,
        sheet_context: &str,
    ) -> Result<Vec<Action>, CorrectionError>;
}

impl<F> CorrectionCallback for F
where
    F: Fn(&str, &str) -> Result<Vec<Action>, CorrectionError> + Send + Sync,
{
    fn request_corrections(
        &self,
        error_description: &str,
        sheet_context: &str,
    ) -> Result<Vec<Action>, CorrectionError> {
        self(error_description, sheet_context)
    }
}

#[derive(Default)]
pub struct MemoryWorkbookCache {
    entries: RwLock<FxHashMap<String, Vec<Sheet>>>,
}

impl MemoryWorkbookCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl WorkbookCache for MemoryWorkbookCache {
    fn get_sheets(&self, workbook_id: &str) -> Option<Vec<Sheet>> {
        self.entries.read().get(workbook_id).cloned()
    }

    fn update_cached_sheets(&self, workbook_id: &str, sheets: Vec<Sheet>) {
        self.entries.write().insert(workbook_id.to_string(), sheets);
    }

    fn evict_cache(&self, workbook_id: &str) {
        self.entries.write().remove(workbook_id);
    }
}

/// Fixed set of workbooks, e.g. parsed uploads registered up front.
#[derive(Default)]
pub struct MemorySheetSource {
    workbooks: RwLock<FxHashMap<String, Workbook>>,
}

impl MemorySheetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, workbook: Workbook) {
        self.workbooks.write().insert(workbook.id.clone(), workbook);
    }

    pub fn remove(&self, workbook_id: &str) -> Option<Workbook> {
        self.workbooks.write().remove(workbook_id)
    }
}

impl SheetSource for MemorySheetSource {
    fn load(&self, workbook_id: &str) -> Option<Workbook> {
        self.workbooks.read().get(workbook_id).cloned()
    }
}

/// Every unknown workbook starts as a single empty `Sheet1`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankWorkbookSource;

impl SheetSource for BlankWorkbookSource {
    fn load(&self, workbook_id: &str) -> Option<Workbook> {
        Some(Workbook::new(
            workbook_id,
            vec![Sheet::new("sheet-1", "Sheet1")],
        ))
    }
}
