//! One workbook's engine projection plus its tentative-push ledger.
//!
//! Pushes made while evaluation is suspended are *tentative*: a rejected push
//! is recorded as a [`SyncFailure`] instead of being returned, and the batch
//! that caused it is expected to call [`EngineInstance::resync_formulas`] once
//! evaluation resumes. Nothing here ever fails a batch.

use crate::engine::FormulaEngine;
use crate::error::EngineError;
use rustc_hash::{FxHashMap, FxHashSet};
use sheetmend_common::{Cell, CellAddr, CellValue, Sheet};
use tracing::{debug, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationState {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub sheet: String,
    pub addr: CellAddr,
    pub formula: Option<String>,
    pub error: EngineError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResyncReport {
    pub formulas_pushed: usize,
    /// Failures that survived the resync.
    pub failures: Vec<SyncFailure>,
}

impl ResyncReport {
    pub fn converged(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct EngineInstance {
    engine: Box<dyn FormulaEngine>,
    state: EvaluationState,
    ledger: Vec<SyncFailure>,
    /// Addresses with a non-empty push per sheet name, so a rebuild can
    /// clear cells that moved away.
    pushed: FxHashMap<String, FxHashSet<CellAddr>>,
}

impl EngineInstance {
    pub fn new(engine: Box<dyn FormulaEngine>) -> Self {
        Self {
            engine,
            state: EvaluationState::Active,
            ledger: Vec::new(),
            pushed: FxHashMap::default(),
        }
    }

    /// Project a whole workbook: every sheet is registered before any cell is
    /// pushed, and values go in before formulas.
    pub fn from_sheets(engine: Box<dyn FormulaEngine>, sheets: &[Sheet]) -> Self {
        let mut instance = Self::new(engine);
        for sheet in sheets {
            instance.register_sheet(&sheet.name);
        }
        for sheet in sheets {
            instance.push_values(sheet);
        }
        for sheet in sheets {
            instance.push_formulas(sheet);
        }
        if let Err(err) = instance.recalculate() {
            warn!(error = %err, "initial recalculation failed");
        }
        instance
    }

    pub fn state(&self) -> EvaluationState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.state == EvaluationState::Suspended
    }

    pub fn suspend_evaluation(&mut self) {
        self.state = EvaluationState::Suspended;
    }

    pub fn resume_evaluation(&mut self) {
        self.state = EvaluationState::Active;
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.engine.has_sheet(name)
    }

    pub fn register_sheet(&mut self, name: &str) {
        if let Err(err) = self.engine.add_sheet(name) {
            warn!(sheet = name, error = %err, "failed to register sheet with formula engine");
        }
    }

    pub fn remove_sheet(&mut self, name: &str) {
        self.pushed.remove(name);
        self.ledger.retain(|f| f.sheet != name);
        if let Err(err) = self.engine.remove_sheet(name) {
            warn!(sheet = name, error = %err, "failed to remove sheet from formula engine");
        }
    }

    pub fn rename_sheet(&mut self, old: &str, new: &str) {
        if let Some(addrs) = self.pushed.remove(old) {
            self.pushed.insert(new.to_string(), addrs);
        }
        for failure in self.ledger.iter_mut().filter(|f| f.sheet == old) {
            failure.sheet = new.to_string();
        }
        if let Err(err) = self.engine.rename_sheet(old, new) {
            warn!(sheet = old, new_name = new, error = %err, "failed to rename sheet in formula engine");
        }
    }

    fn record(&mut self, sheet: &str, addr: CellAddr, formula: Option<&str>, error: EngineError) {
        warn!(sheet, cell = %addr, error = %error, "engine sync failure");
        self.ledger.push(SyncFailure {
            sheet: sheet.to_string(),
            addr,
            formula: formula.map(str::to_string),
            error,
        });
    }

    fn mark(&mut self, sheet: &str, addr: CellAddr, present: bool) {
        let set = self.pushed.entry(sheet.to_string()).or_default();
        if present {
            set.insert(addr);
        } else {
            set.remove(&addr);
        }
    }

    pub fn push_value(&mut self, sheet: &str, addr: CellAddr, value: &CellValue) {
        match self.engine.set_value(sheet, addr, value) {
            Ok(()) => self.mark(sheet, addr, !value.is_null()),
            Err(err) => self.record(sheet, addr, None, err),
        }
    }

    pub fn push_formula(&mut self, sheet: &str, addr: CellAddr, formula: &str) {
        match self.engine.set_formula(sheet, addr, formula) {
            Ok(()) => self.mark(sheet, addr, true),
            Err(err) => self.record(sheet, addr, Some(formula), err),
        }
    }

    pub fn push_cell(&mut self, sheet: &str, addr: CellAddr, cell: &Cell) {
        match cell.formula.as_deref() {
            Some(formula) => self.push_formula(sheet, addr, formula),
            None => self.push_value(sheet, addr, &cell.value),
        }
    }

    pub fn clear(&mut self, sheet: &str, addr: CellAddr) {
        self.push_value(sheet, addr, &CellValue::Null);
    }

    fn push_values(&mut self, sheet: &Sheet) {
        for (addr, cell) in &sheet.cells {
            if !cell.is_formula() && !cell.value.is_null() {
                self.push_value(&sheet.name, *addr, &cell.value);
            }
        }
    }

    fn push_formulas(&mut self, sheet: &Sheet) -> usize {
        let mut pushed = 0;
        for (addr, formula) in sheet.formula_cells() {
            self.push_formula(&sheet.name, addr, formula);
            pushed += 1;
        }
        pushed
    }

    /// Replay a sheet's full contents after its addressing changed.
    pub fn rebuild_sheet(&mut self, sheet: &Sheet) {
        let _span = info_span!("rebuild_sheet", sheet = %sheet.name).entered();
        if !self.engine.has_sheet(&sheet.name) {
            self.register_sheet(&sheet.name);
        }
        self.ledger.retain(|f| f.sheet != sheet.name);
        let stale: Vec<CellAddr> = self
            .pushed
            .get(&sheet.name)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|addr| {
                        // Format-only cells are never pushed, so they must be cleared here.
                        sheet
                            .cells
                            .get(addr)
                            .is_none_or(|cell| !cell.is_formula() && cell.value.is_null())
                    })
                    .collect()
            })
            .unwrap_or_default();
        for addr in stale {
            self.clear(&sheet.name, addr);
        }
        self.push_values(sheet);
        let formulas = self.push_formulas(sheet);
        debug!(cells = sheet.cells.len(), formulas, "sheet rebuilt");
    }

    /// Re-push every formula cell of every sheet; clears the ledger first so
    /// the report holds only failures that persist.
    pub fn resync_formulas(&mut self, sheets: &[Sheet]) -> ResyncReport {
        let before = std::mem::take(&mut self.ledger);
        if !before.is_empty() {
            debug!(pending = before.len(), "resyncing after tentative push failures");
        }
        let mut formulas_pushed = 0;
        for sheet in sheets {
            formulas_pushed += self.push_formulas(sheet);
        }
        ResyncReport {
            formulas_pushed,
            failures: self.ledger.clone(),
        }
    }

    pub fn sync_failures(&self) -> &[SyncFailure] {
        &self.ledger
    }

    pub fn take_sync_failures(&mut self) -> Vec<SyncFailure> {
        std::mem::take(&mut self.ledger)
    }

    /// Deferred while suspended.
    pub fn recalculate(&mut self) -> Result<(), EngineError> {
        if self.is_suspended() {
            debug!("recalculation deferred while suspended");
            return Ok(());
        }
        self.engine.recalculate()
    }

    pub fn value(&self, sheet: &str, addr: CellAddr) -> Option<CellValue> {
        self.engine.value(sheet, addr)
    }
}
