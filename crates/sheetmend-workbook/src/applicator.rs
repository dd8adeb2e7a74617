//! Per-action dispatch against the sheet model, mirrored into the engine.
//!
//! Engine pushes made here are tentative (see `EngineInstance`); the caller
//! owns the suspend/resume bracket and the resync that follows it.

use crate::error::{Result, SheetMendError, ValidationIssue};
use crate::structural::{ShiftOperation, shift_sheet, sort_range};
use serde::Serialize;
use sheetmend_common::formula::{quote_sheet_name, rewrite_references, with_leading_eq};
use sheetmend_common::{
    Action, CellAddr, CellFormat, CellValue, MergeRange, RangeAddr, Sheet, resolve_sheet_index,
    sanitize_sheet_name, sheet_names_eq, unique_sheet_name,
};
use sheetmend_engine::{EngineError, EngineInstance, SyncFailure};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A cell whose visible value or formula differs from before the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedCell {
    pub sheet_id: String,
    pub sheet_name: String,
    pub cell: CellAddr,
    pub value: CellValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub revision_id: String,
    pub version: u64,
    pub changed_cells: Vec<ChangedCell>,
    pub warnings: Vec<ValidationIssue>,
}

impl ApplyResult {
    pub fn changed(&self, sheet_name: &str, a1: &str) -> Option<&ChangedCell> {
        let addr = CellAddr::from_a1(a1).ok()?;
        self.changed_cells
            .iter()
            .find(|c| c.cell == addr && sheet_names_eq(&c.sheet_name, sheet_name))
    }
}

/// Applies one validated batch's actions in order.
pub struct Applicator<'a> {
    sheets: &'a mut Vec<Sheet>,
    engine: &'a mut EngineInstance,
}

impl<'a> Applicator<'a> {
    pub fn new(sheets: &'a mut Vec<Sheet>, engine: &'a mut EngineInstance) -> Self {
        Self { sheets, engine }
    }

    pub fn apply_all(&mut self, actions: &[Action]) -> Result<()> {
        for (index, action) in actions.iter().enumerate() {
            debug!(index, kind = action.kind(), "dispatching action");
            self.dispatch(action)?;
        }
        Ok(())
    }

    fn sheet_index(&self, target: &str) -> Result<usize> {
        resolve_sheet_index(self.sheets, target)
            .ok_or_else(|| SheetMendError::not_found(format!("sheet `{target}`")))
    }

    pub fn dispatch(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::SetCell {
                sheet_id,
                cell,
                value,
                formula,
            } => {
                let idx = self.sheet_index(sheet_id)?;
                let anchor = self.sheets[idx].resolve_anchor(*cell);
                match formula.as_deref().or_else(|| value.formula_text()) {
                    Some(formula) => self.write_formula(idx, anchor, formula),
                    None => self.write_value(idx, anchor, value.clone()),
                }
            }
            Action::SetRange {
                sheet_id,
                range,
                values,
            } => {
                let idx = self.sheet_index(sheet_id)?;
                self.write_block(idx, range.start, values);
            }
            Action::CreateSheet { name, sheet_id } => self.create_sheet(name, sheet_id.as_deref()),
            Action::DeleteSheet { sheet_id } => {
                let idx = self.sheet_index(sheet_id)?;
                let removed = self.sheets.remove(idx);
                self.engine.remove_sheet(&removed.name);
            }
            Action::RenameSheet { sheet_id, new_name } => {
                let idx = self.sheet_index(sheet_id)?;
                self.rename_sheet(idx, new_name);
            }
            Action::FormatCells {
                sheet_id,
                range,
                format,
            } => {
                let idx = self.sheet_index(sheet_id)?;
                format_cells(&mut self.sheets[idx], *range, format);
            }
            Action::InsertRows {
                sheet_id, at, count,
            } => self.shift(sheet_id, ShiftOperation::InsertRows {
                before: *at,
                count: *count,
            })?,
            Action::DeleteRows {
                sheet_id, at, count,
            } => self.shift(sheet_id, ShiftOperation::DeleteRows {
                start: *at,
                count: *count,
            })?,
            Action::InsertCols {
                sheet_id, at, count,
            } => self.shift(sheet_id, ShiftOperation::InsertColumns {
                before: *at,
                count: *count,
            })?,
            Action::DeleteCols {
                sheet_id, at, count,
            } => self.shift(sheet_id, ShiftOperation::DeleteColumns {
                start: *at,
                count: *count,
            })?,
            Action::SortRange {
                sheet_id,
                range,
                column,
                ascending,
            } => {
                let idx = self.sheet_index(sheet_id)?;
                sort_range(&mut self.sheets[idx], *range, *column, *ascending);
                self.engine.rebuild_sheet(&self.sheets[idx]);
            }
            Action::MergeCells { sheet_id, range } => {
                let idx = self.sheet_index(sheet_id)?;
                self.merge(idx, *range);
            }
            Action::UnmergeCells { sheet_id, range } => {
                let idx = self.sheet_index(sheet_id)?;
                self.sheets[idx]
                    .merges
                    .retain(|m| !m.to_range().intersects(range));
            }
        }
        Ok(())
    }

    fn write_formula(&mut self, idx: usize, addr: CellAddr, formula: &str) {
        let formula = with_leading_eq(formula);
        let sheet = &mut self.sheets[idx];
        sheet.set_formula(addr, formula.clone());
        self.engine.push_formula(&sheet.name, addr, &formula);
    }

    fn write_value(&mut self, idx: usize, addr: CellAddr, value: CellValue) {
        let sheet = &mut self.sheets[idx];
        if value.is_null() {
            if let Some(cell) = sheet.cells.get_mut(&addr) {
                cell.set_value(CellValue::Null);
                if cell.is_default() {
                    sheet.cells.remove(&addr);
                }
            }
            self.engine.clear(&sheet.name, addr);
            return;
        }
        self.engine.push_value(&sheet.name, addr, &value);
        sheet.set_value(addr, value);
    }

    /// Row-major block write. Values past the grid are dropped; interior
    /// cells of merged blocks are skipped so only anchors carry data.
    fn write_block(&mut self, idx: usize, start: CellAddr, values: &[Vec<CellValue>]) {
        let mut skipped = 0usize;
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                let Some(addr) = start.offset(r as u32, c as u32) else {
                    skipped += 1;
                    continue;
                };
                if self.sheets[idx].resolve_anchor(addr) != addr {
                    skipped += 1;
                    continue;
                }
                match value.formula_text() {
                    Some(formula) => self.write_formula(idx, addr, formula),
                    None => self.write_value(idx, addr, value.clone()),
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, "range values outside the grid or inside merges were dropped");
        }
    }

    fn create_sheet(&mut self, name: &str, requested_id: Option<&str>) {
        let name = unique_sheet_name(name, self.sheets.iter().map(|s| s.name.as_str()));
        let id = requested_id
            .filter(|id| !self.sheets.iter().any(|s| s.id == *id))
            .map(str::to_string)
            .unwrap_or_else(|| next_sheet_id(self.sheets));
        self.engine.register_sheet(&name);
        self.sheets.push(Sheet::new(id, name));
    }

    fn rename_sheet(&mut self, idx: usize, new_name: &str) {
        let new_name = sanitize_sheet_name(new_name);
        let old_name = std::mem::replace(&mut self.sheets[idx].name, new_name.clone());
        if old_name == new_name {
            return;
        }
        let rewritten = rename_references(self.sheets, &old_name, &new_name);
        self.engine.rename_sheet(&old_name, &new_name);
        for (sheet_idx, addr) in rewritten {
            self.repush(sheet_idx, addr);
        }
    }

    fn shift(&mut self, target: &str, op: ShiftOperation) -> Result<()> {
        let idx = self.sheet_index(target)?;
        let outcome = shift_sheet(self.sheets, idx, &op);
        debug!(?op, dropped = outcome.dropped, rewritten = outcome.rewritten.len(), "structural edit");
        self.engine.rebuild_sheet(&self.sheets[idx]);
        for (sheet_idx, addr) in outcome.rewritten {
            if sheet_idx != idx {
                self.repush(sheet_idx, addr);
            }
        }
        Ok(())
    }

    fn repush(&mut self, sheet_idx: usize, addr: CellAddr) {
        let sheet = &self.sheets[sheet_idx];
        if let Some(cell) = sheet.cell(addr) {
            self.engine.push_cell(&sheet.name, addr, cell);
        }
    }

    fn merge(&mut self, idx: usize, range: RangeAddr) {
        let sheet = &mut self.sheets[idx];
        let merge = MergeRange::from_range(range);
        if !sheet.merges.contains(&merge) {
            sheet.merges.push(merge);
        }
        let anchor = merge.anchor();
        let interior: Vec<CellAddr> = sheet
            .cells
            .keys()
            .copied()
            .filter(|addr| *addr != anchor && range.contains(*addr))
            .collect();
        for addr in interior {
            sheet.cells.remove(&addr);
            self.engine.clear(&sheet.name, addr);
        }
        sheet.rebuild_used_range();
    }
}

fn next_sheet_id(sheets: &[Sheet]) -> String {
    let mut n = sheets.len() + 1;
    loop {
        let candidate = format!("sheet-{n}");
        if !sheets.iter().any(|s| s.id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Shallow format merge over every cell in the range; absent cells are
/// materialized so a format can precede a value.
pub fn format_cells(sheet: &mut Sheet, range: RangeAddr, format: &CellFormat) {
    for addr in range.cells() {
        sheet.cell_entry(addr).merge_format(format);
    }
}

/// Point qualified references to `old` at `new` across the workbook.
pub fn rename_references(sheets: &mut [Sheet], old: &str, new: &str) -> Vec<(usize, CellAddr)> {
    let qualifier = quote_sheet_name(new);
    let mut rewritten = Vec::new();
    for (sheet_idx, sheet) in sheets.iter_mut().enumerate() {
        let mut updates = Vec::new();
        for (addr, formula) in sheet.formula_cells() {
            let result = rewrite_references(formula, |reference| {
                reference
                    .sheet
                    .as_deref()
                    .filter(|sheet| sheet_names_eq(sheet, old))
                    .map(|_| format!("{qualifier}!{}", reference.target))
            });
            match result {
                Ok(updated) if updated != formula => updates.push((addr, updated)),
                Ok(_) => {}
                Err(err) => warn!(sheet = %sheet.name, cell = %addr, error = %err, "formula left unrenamed"),
            }
        }
        for (addr, updated) in updates {
            sheet.set_formula(addr, updated);
            rewritten.push((sheet_idx, addr));
        }
    }
    rewritten
}

fn failure_token(error: &EngineError) -> &'static str {
    match error {
        EngineError::MissingReferencedSheet { .. } => "#REF!",
        _ => "#ERROR!",
    }
}

/// Copy the engine's results into every formula cell's `computed_value`.
/// Formulas the engine never accepted surface as error tokens.
pub fn refresh_computed(sheets: &mut [Sheet], engine: &EngineInstance, unresolved: &[SyncFailure]) {
    for sheet in sheets.iter_mut() {
        let name = sheet.name.as_str();
        for (addr, cell) in sheet.cells.iter_mut() {
            if !cell.is_formula() {
                continue;
            }
            let failed = unresolved
                .iter()
                .find(|f| f.addr == *addr && sheet_names_eq(&f.sheet, name));
            cell.computed_value = match failed {
                Some(failure) => CellValue::Text(failure_token(&failure.error).to_string()),
                None => engine.value(name, *addr).unwrap_or_default(),
            };
        }
    }
}

/// Cells whose visible value moved between `before` and `after`, matched by
/// sheet id. A formula rewrite that leaves the result unchanged is not a
/// change; deleted sheets are not reported.
pub fn diff_changes(before: &[Sheet], after: &[Sheet]) -> Vec<ChangedCell> {
    let mut changes = Vec::new();
    let null = CellValue::Null;
    for sheet in after {
        let prior = before.iter().find(|s| s.id == sheet.id);
        let addrs: BTreeSet<CellAddr> = sheet
            .cells
            .keys()
            .chain(prior.into_iter().flat_map(|p| p.cells.keys()))
            .copied()
            .collect();
        for addr in addrs {
            let now = sheet.cell(addr);
            let was = prior.and_then(|p| p.cell(addr));
            let now_value = now.map(|c| &c.computed_value).unwrap_or(&null);
            let was_value = was.map(|c| &c.computed_value).unwrap_or(&null);
            if now_value != was_value {
                changes.push(ChangedCell {
                    sheet_id: sheet.id.clone(),
                    sheet_name: sheet.name.clone(),
                    cell: addr,
                    value: now_value.clone(),
                    formula: now.and_then(|c| c.formula.clone()),
                });
            }
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmend_engine::FormualizerEngine;

    fn engine() -> EngineInstance {
        EngineInstance::new(Box::new(FormualizerEngine::new()))
    }

    fn set_cell(sheet: &str, a1: &str, value: CellValue) -> Action {
        Action::SetCell {
            sheet_id: sheet.into(),
            cell: CellAddr::from_a1(a1).unwrap(),
            value,
            formula: None,
        }
    }

    #[test]
    fn writes_inside_merges_land_on_the_anchor() {
        let mut sheets = vec![Sheet::new("s1", "Sheet1")];
        let mut engine = engine();
        engine.register_sheet("Sheet1");
        let mut applicator = Applicator::new(&mut sheets, &mut engine);
        applicator
            .apply_all(&[
                Action::MergeCells {
                    sheet_id: "s1".into(),
                    range: RangeAddr::from_a1("B2:D4").unwrap(),
                },
                set_cell("s1", "C3", "hello".into()),
            ])
            .unwrap();
        let sheet = &sheets[0];
        assert_eq!(sheet.cell(CellAddr::new(1, 1)).unwrap().value, CellValue::from("hello"));
        assert!(sheet.cell(CellAddr::new(2, 2)).is_none());
    }

    #[test]
    fn merging_clears_interior_cells() {
        let mut sheets = vec![Sheet::new("s1", "Sheet1")];
        sheets[0].set_value(CellAddr::new(0, 0), 1.0.into());
        sheets[0].set_value(CellAddr::new(0, 1), 2.0.into());
        let mut engine = engine();
        engine.register_sheet("Sheet1");
        Applicator::new(&mut sheets, &mut engine)
            .apply_all(&[Action::MergeCells {
                sheet_id: "Sheet1".into(),
                range: RangeAddr::from_a1("A1:B1").unwrap(),
            }])
            .unwrap();
        assert_eq!(sheets[0].cells.len(), 1);
        assert_eq!(sheets[0].used_range.map(|r| r.end_col), Some(0));
    }

    #[test]
    fn rename_rewrites_dependent_formulas() {
        let mut sheets = vec![Sheet::new("s1", "Data"), Sheet::new("s2", "Summary")];
        sheets[1].set_formula(CellAddr::new(0, 0), "=Data!A1+SUM(Data!B1:B3)".into());
        let mut engine = engine();
        engine.register_sheet("Data");
        engine.register_sheet("Summary");
        Applicator::new(&mut sheets, &mut engine)
            .apply_all(&[Action::RenameSheet {
                sheet_id: "s1".into(),
                new_name: "Raw Data".into(),
            }])
            .unwrap();
        assert_eq!(sheets[0].name, "Raw Data");
        assert_eq!(
            sheets[1].cell(CellAddr::new(0, 0)).unwrap().formula.as_deref(),
            Some("='Raw Data'!A1+SUM('Raw Data'!B1:B3)")
        );
    }

    #[test]
    fn created_sheets_get_unique_names_and_ids() {
        let mut sheets = vec![Sheet::new("sheet-2", "Data")];
        let mut engine = engine();
        Applicator::new(&mut sheets, &mut engine)
            .apply_all(&[Action::CreateSheet {
                name: "data".into(),
                sheet_id: None,
            }])
            .unwrap();
        assert_eq!(sheets[1].name, "data (2)");
        assert_eq!(sheets[1].id, "sheet-3");
        assert!(engine.has_sheet("data (2)"));
    }

    #[test]
    fn format_materializes_cells_and_set_range_canonicalizes() {
        let mut sheets = vec![Sheet::new("s1", "S")];
        let mut engine = engine();
        engine.register_sheet("S");
        let mut format = CellFormat::new();
        format.insert("bold".into(), serde_json::json!(true));
        Applicator::new(&mut sheets, &mut engine)
            .apply_all(&[
                Action::FormatCells {
                    sheet_id: "S".into(),
                    range: RangeAddr::from_a1("A1:A2").unwrap(),
                    format,
                },
                Action::SetRange {
                    sheet_id: "S".into(),
                    range: RangeAddr::from_a1("A1:B1").unwrap(),
                    values: vec![vec![5.0.into(), "=  A1*2 ".into()]],
                },
            ])
            .unwrap();
        let sheet = &sheets[0];
        let a1 = sheet.cell(CellAddr::new(0, 0)).unwrap();
        assert_eq!(a1.value, CellValue::Number(5.0));
        assert!(a1.format.is_some());
        assert!(sheet.cell(CellAddr::new(1, 0)).unwrap().format.is_some());
        assert_eq!(
            sheet.cell(CellAddr::new(0, 1)).unwrap().formula.as_deref(),
            Some("=  A1*2")
        );
    }

    #[test]
    fn diff_reports_only_moved_values() {
        let mut before = Sheet::new("s1", "S");
        before.set_value(CellAddr::new(0, 0), 1.0.into());
        before.set_value(CellAddr::new(0, 1), 2.0.into());
        let mut after = before.clone();
        after.set_value(CellAddr::new(0, 1), 3.0.into());
        after.remove_cell(CellAddr::new(0, 0));
        after.set_value(CellAddr::new(5, 5), 1.0.into());
        let diff = diff_changes(&[before], &[after]);
        let cells: Vec<String> = diff.iter().map(|c| c.cell.to_a1()).collect();
        assert_eq!(cells, vec!["A1", "B1", "F6"]);
        assert_eq!(diff[0].value, CellValue::Null);
    }

    #[test]
    fn diff_ignores_formula_rewrites_with_the_same_result() {
        let mut before = Sheet::new("s1", "S");
        before.set_formula(CellAddr::new(0, 0), "=Data!A1".to_string());
        before.cell_entry(CellAddr::new(0, 0)).computed_value = 7.0.into();
        let mut after = before.clone();
        after.cell_entry(CellAddr::new(0, 0)).formula = Some("='Raw Data'!A1".to_string());
        assert!(diff_changes(&[before.clone()], &[after.clone()]).is_empty());

        after.cell_entry(CellAddr::new(0, 0)).computed_value = 8.0.into();
        let diff = diff_changes(&[before], &[after]);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].formula.as_deref(), Some("='Raw Data'!A1"));
    }
}
