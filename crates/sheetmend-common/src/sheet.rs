//! Canonical in-memory sheet model.

use crate::address::{CellAddr, RangeAddr};
use crate::limits::{MAX_COLS, MAX_ROWS};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Style attributes; merged shallowly key-by-key.
pub type CellFormat = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Empty,
    Text,
    Number,
    Boolean,
    Formula,
}

impl CellKind {
    pub fn of_value(value: &CellValue) -> Self {
        match value {
            CellValue::Null => CellKind::Empty,
            CellValue::Bool(_) => CellKind::Boolean,
            CellValue::Number(_) => CellKind::Number,
            CellValue::Text(_) => CellKind::Text,
        }
    }
}

/// A single cell record.
///
/// Exactly one of `value`/`formula` drives `computed_value`: a formula cell
/// always carries `value == Null`, and a literal cell mirrors `value` into
/// `computed_value`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default)]
    pub computed_value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<CellFormat>,
    #[serde(rename = "type", default)]
    pub kind: CellKind,
}

impl Cell {
    pub fn from_value(value: impl Into<CellValue>) -> Self {
        let mut cell = Cell::default();
        cell.set_value(value.into());
        cell
    }

    pub fn from_formula(formula: impl Into<String>) -> Self {
        let mut cell = Cell::default();
        cell.set_formula(formula.into());
        cell
    }

    /// Store a literal; drops any formula.
    pub fn set_value(&mut self, value: CellValue) {
        self.kind = CellKind::of_value(&value);
        self.computed_value = value.clone();
        self.value = value;
        self.formula = None;
    }

    /// Store a formula; `computed_value` is left for the next recalculation
    /// so the change diff can see whether the visible value moved.
    pub fn set_formula(&mut self, formula: String) {
        self.value = CellValue::Null;
        self.formula = Some(formula);
        self.kind = CellKind::Formula;
    }

    #[inline]
    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Empty content and no formatting.
    pub fn is_default(&self) -> bool {
        self.value.is_null()
            && self.formula.is_none()
            && self.format.as_ref().is_none_or(|f| f.is_empty())
    }

    pub fn merge_format(&mut self, patch: &CellFormat) {
        let format = self.format.get_or_insert_with(CellFormat::new);
        for (key, value) in patch {
            format.insert(key.clone(), value.clone());
        }
    }
}

/// Inclusive zero-based merge block. Only the top-left anchor holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl MergeRange {
    pub fn from_range(range: RangeAddr) -> Self {
        Self {
            start_row: range.start.row,
            start_col: range.start.col,
            end_row: range.end.row,
            end_col: range.end.col,
        }
    }

    pub fn to_range(self) -> RangeAddr {
        RangeAddr::new(
            CellAddr::new(self.start_row, self.start_col),
            CellAddr::new(self.end_row, self.end_col),
        )
    }

    #[inline]
    pub fn anchor(&self) -> CellAddr {
        CellAddr::new(self.start_row, self.start_col)
    }

    pub fn contains(&self, addr: CellAddr) -> bool {
        self.to_range().contains(addr)
    }
}

/// Bounding box of every non-default cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl UsedRange {
    pub fn single(addr: CellAddr) -> Self {
        Self {
            start_row: addr.row,
            start_col: addr.col,
            end_row: addr.row,
            end_col: addr.col,
        }
    }

    pub fn include(&mut self, addr: CellAddr) {
        self.start_row = self.start_row.min(addr.row);
        self.start_col = self.start_col.min(addr.col);
        self.end_row = self.end_row.max(addr.row);
        self.end_col = self.end_col.max(addr.col);
    }

    pub fn contains(&self, addr: CellAddr) -> bool {
        addr.row >= self.start_row
            && addr.row <= self.end_row
            && addr.col >= self.start_col
            && addr.col <= self.end_col
    }

    pub fn clamp_to_limits(&mut self) {
        self.start_row = self.start_row.min(MAX_ROWS - 1);
        self.end_row = self.end_row.min(MAX_ROWS - 1);
        self.start_col = self.start_col.min(MAX_COLS - 1);
        self.end_col = self.end_col.min(MAX_COLS - 1);
    }

    pub fn to_range(self) -> RangeAddr {
        RangeAddr::new(
            CellAddr::new(self.start_row, self.start_col),
            CellAddr::new(self.end_row, self.end_col),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cells: BTreeMap<CellAddr, Cell>,
    #[serde(default)]
    pub merges: Vec<MergeRange>,
    #[serde(default)]
    pub col_widths: BTreeMap<u32, f64>,
    #[serde(default)]
    pub row_heights: BTreeMap<u32, f64>,
    #[serde(default)]
    pub frozen_rows: u32,
    #[serde(default)]
    pub frozen_cols: u32,
    #[serde(default)]
    pub used_range: Option<UsedRange>,
}

impl Sheet {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cell(&self, addr: CellAddr) -> Option<&Cell> {
        self.cells.get(&addr)
    }

    pub fn merge_containing(&self, addr: CellAddr) -> Option<&MergeRange> {
        self.merges.iter().find(|m| m.contains(addr))
    }

    /// Edits inside a merged block land on its top-left anchor.
    pub fn resolve_anchor(&self, addr: CellAddr) -> CellAddr {
        self.merge_containing(addr)
            .map(MergeRange::anchor)
            .unwrap_or(addr)
    }

    /// Cell record at `addr`, materialized when absent.
    pub fn cell_entry(&mut self, addr: CellAddr) -> &mut Cell {
        self.touch_used_range(addr);
        self.cells.entry(addr).or_default()
    }

    pub fn set_value(&mut self, addr: CellAddr, value: CellValue) {
        self.cell_entry(addr).set_value(value);
    }

    pub fn set_formula(&mut self, addr: CellAddr, formula: String) {
        self.cell_entry(addr).set_formula(formula);
    }

    pub fn remove_cell(&mut self, addr: CellAddr) -> Option<Cell> {
        self.cells.remove(&addr)
    }

    /// Incremental `used_range` growth for a single write.
    pub fn touch_used_range(&mut self, addr: CellAddr) {
        match self.used_range.as_mut() {
            Some(range) => range.include(addr),
            None => self.used_range = Some(UsedRange::single(addr)),
        }
    }

    /// Full recomputation after bulk moves.
    pub fn rebuild_used_range(&mut self) {
        let mut out: Option<UsedRange> = None;
        for addr in self.cells.keys() {
            match out.as_mut() {
                Some(range) => range.include(*addr),
                None => out = Some(UsedRange::single(*addr)),
            }
        }
        if let Some(range) = out.as_mut() {
            range.clamp_to_limits();
        }
        self.used_range = out;
    }

    pub fn formula_cells(&self) -> impl Iterator<Item = (CellAddr, &str)> {
        self.cells
            .iter()
            .filter_map(|(addr, cell)| cell.formula.as_deref().map(|f| (*addr, f)))
    }

    pub fn has_formulas(&self) -> bool {
        self.cells.values().any(Cell::is_formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_cells_keep_value_null() {
        let mut cell = Cell::from_value(3.0);
        cell.set_formula("=1+1".into());
        assert_eq!(cell.value, CellValue::Null);
        assert_eq!(cell.kind, CellKind::Formula);
        // Stale computed value survives until recalculation.
        assert_eq!(cell.computed_value, CellValue::Number(3.0));

        cell.set_value(CellValue::from("x"));
        assert!(cell.formula.is_none());
        assert_eq!(cell.computed_value, CellValue::from("x"));
    }

    #[test]
    fn format_merge_is_shallow() {
        let mut cell = Cell::default();
        let mut a = CellFormat::new();
        a.insert("bold".into(), serde_json::json!(true));
        a.insert("font".into(), serde_json::json!({"size": 10}));
        cell.merge_format(&a);
        let mut b = CellFormat::new();
        b.insert("font".into(), serde_json::json!({"color": "red"}));
        cell.merge_format(&b);
        let format = cell.format.unwrap();
        assert_eq!(format["bold"], serde_json::json!(true));
        assert_eq!(format["font"], serde_json::json!({"color": "red"}));
    }

    #[test]
    fn used_range_grows_and_rebuilds() {
        let mut sheet = Sheet::new("s1", "Sheet1");
        sheet.set_value(CellAddr::new(4, 2), 1.0.into());
        sheet.set_value(CellAddr::new(1, 5), 2.0.into());
        assert_eq!(
            sheet.used_range,
            Some(UsedRange {
                start_row: 1,
                start_col: 2,
                end_row: 4,
                end_col: 5
            })
        );
        sheet.remove_cell(CellAddr::new(4, 2));
        sheet.rebuild_used_range();
        assert_eq!(sheet.used_range, Some(UsedRange::single(CellAddr::new(1, 5))));
    }

    #[test]
    fn anchor_resolution_follows_merges() {
        let mut sheet = Sheet::new("s1", "Sheet1");
        sheet
            .merges
            .push(MergeRange::from_range(RangeAddr::from_a1("B2:C4").unwrap()));
        assert_eq!(sheet.resolve_anchor(CellAddr::new(3, 2)), CellAddr::new(1, 1));
        assert_eq!(sheet.resolve_anchor(CellAddr::new(0, 0)), CellAddr::new(0, 0));
    }
}
