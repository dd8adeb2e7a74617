//! The formula-evaluation seam and its formualizer-backed implementation.

use crate::error::EngineError;
use formualizer_workbook::{LiteralValue, Workbook, WorkbookMode};
use sheetmend_common::formula::{referenced_sheets, with_leading_eq};
use sheetmend_common::{CellAddr, CellValue, sheet_names_eq};

/// Evaluation backend for one workbook. Addresses are zero-based.
pub trait FormulaEngine: Send {
    fn has_sheet(&self, name: &str) -> bool;

    fn add_sheet(&mut self, name: &str) -> Result<(), EngineError>;

    fn remove_sheet(&mut self, name: &str) -> Result<(), EngineError>;

    fn rename_sheet(&mut self, old: &str, new: &str) -> Result<(), EngineError>;

    fn set_value(&mut self, sheet: &str, addr: CellAddr, value: &CellValue)
    -> Result<(), EngineError>;

    fn set_formula(&mut self, sheet: &str, addr: CellAddr, formula: &str)
    -> Result<(), EngineError>;

    fn clear_cell(&mut self, sheet: &str, addr: CellAddr) -> Result<(), EngineError> {
        self.set_value(sheet, addr, &CellValue::Null)
    }

    /// Evaluate everything dirty since the last call.
    fn recalculate(&mut self) -> Result<(), EngineError>;

    /// Current value at `addr`; formula cells report their last result.
    fn value(&self, sheet: &str, addr: CellAddr) -> Option<CellValue>;
}

/// Builds fresh engines for the instance cache.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn FormulaEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Box<dyn FormulaEngine> + Send + Sync,
{
    fn create(&self) -> Box<dyn FormulaEngine> {
        self()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FormualizerFactory;

impl EngineFactory for FormualizerFactory {
    fn create(&self) -> Box<dyn FormulaEngine> {
        Box::new(FormualizerEngine::new())
    }
}

/// `formualizer` workbook in ephemeral mode (no changelog, eager graph).
pub struct FormualizerEngine {
    workbook: Workbook,
}

impl Default for FormualizerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormualizerEngine {
    pub fn new() -> Self {
        Self {
            workbook: Workbook::new_with_mode(WorkbookMode::Ephemeral),
        }
    }

    /// Name as registered in the engine, matched case-insensitively.
    fn registered_name(&self, name: &str) -> Option<String> {
        self.workbook
            .sheet_names()
            .into_iter()
            .find(|registered| sheet_names_eq(registered, name))
    }

    fn require_sheet(&self, name: &str) -> Result<String, EngineError> {
        self.registered_name(name)
            .ok_or_else(|| EngineError::UnknownSheet(name.to_string()))
    }
}

pub(crate) fn to_literal(value: &CellValue) -> LiteralValue {
    match value {
        CellValue::Null => LiteralValue::Empty,
        CellValue::Bool(b) => LiteralValue::Boolean(*b),
        CellValue::Number(n) => LiteralValue::Number(*n),
        CellValue::Text(s) => LiteralValue::Text(s.clone()),
    }
}

pub(crate) fn from_literal(value: LiteralValue) -> CellValue {
    match value {
        LiteralValue::Empty | LiteralValue::Pending => CellValue::Null,
        LiteralValue::Int(i) => CellValue::Number(i as f64),
        LiteralValue::Number(n) => CellValue::Number(n),
        LiteralValue::Boolean(b) => CellValue::Bool(b),
        LiteralValue::Text(s) => CellValue::Text(s),
        LiteralValue::Error(e) => CellValue::Text(e.kind.to_string()),
        // Spilled results are represented by their top-left element.
        LiteralValue::Array(rows) => rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(from_literal)
            .unwrap_or(CellValue::Null),
        other => other
            .as_serial_number()
            .map(CellValue::Number)
            .unwrap_or(CellValue::Null),
    }
}

impl FormulaEngine for FormualizerEngine {
    fn has_sheet(&self, name: &str) -> bool {
        self.registered_name(name).is_some()
    }

    fn add_sheet(&mut self, name: &str) -> Result<(), EngineError> {
        if self.has_sheet(name) {
            return Ok(());
        }
        self.workbook
            .add_sheet(name)
            .map_err(|e| EngineError::Sheet {
                sheet: name.to_string(),
                message: e.to_string(),
            })
    }

    fn remove_sheet(&mut self, name: &str) -> Result<(), EngineError> {
        let Some(registered) = self.registered_name(name) else {
            return Ok(());
        };
        self.workbook
            .delete_sheet(&registered)
            .map_err(|e| EngineError::Sheet {
                sheet: name.to_string(),
                message: e.to_string(),
            })
    }

    fn rename_sheet(&mut self, old: &str, new: &str) -> Result<(), EngineError> {
        let registered = self.require_sheet(old)?;
        self.workbook
            .rename_sheet(&registered, new)
            .map_err(|e| EngineError::Sheet {
                sheet: old.to_string(),
                message: e.to_string(),
            })
    }

    fn set_value(
        &mut self,
        sheet: &str,
        addr: CellAddr,
        value: &CellValue,
    ) -> Result<(), EngineError> {
        let registered = self.require_sheet(sheet)?;
        self.workbook
            .set_value(&registered, addr.row + 1, addr.col + 1, to_literal(value))
            .map_err(|e| EngineError::Push {
                sheet: sheet.to_string(),
                addr,
                message: e.to_string(),
            })
    }

    fn set_formula(
        &mut self,
        sheet: &str,
        addr: CellAddr,
        formula: &str,
    ) -> Result<(), EngineError> {
        let registered = self.require_sheet(sheet)?;
        // The engine registers unknown sheet names implicitly; refuse instead so
        // a later CREATE_SHEET does not collide with a phantom registration.
        for referenced in referenced_sheets(formula)? {
            if !self.has_sheet(&referenced) {
                return Err(EngineError::MissingReferencedSheet {
                    sheet: sheet.to_string(),
                    addr,
                    missing: referenced,
                });
            }
        }
        self.workbook
            .set_formula(&registered, addr.row + 1, addr.col + 1, &with_leading_eq(formula))
            .map_err(|e| EngineError::Push {
                sheet: sheet.to_string(),
                addr,
                message: e.to_string(),
            })
    }

    fn recalculate(&mut self) -> Result<(), EngineError> {
        self.workbook
            .evaluate_all()
            .map(|_| ())
            .map_err(|e| EngineError::Evaluation(e.to_string()))
    }

    fn value(&self, sheet: &str, addr: CellAddr) -> Option<CellValue> {
        let registered = self.registered_name(sheet)?;
        self.workbook
            .get_value(&registered, addr.row + 1, addr.col + 1)
            .map(from_literal)
    }
}
