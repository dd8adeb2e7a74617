//! Row/column insertion and deletion, range sorts, and the reference
//! adjustment that keeps formula text pointing at the cells it meant.

use sheetmend_common::formula::{ReferenceToken, rewrite_references};
use sheetmend_common::{
    CellAddr, CellValue, FormulaError, MAX_COLS, MAX_ROWS, MergeRange, RangeAddr, Sheet,
    col_to_letters, letters_to_col, sheet_names_eq,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

const REF_ERROR: &str = "#REF!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Rows,
    Cols,
}

impl Axis {
    fn limit(self) -> u32 {
        match self {
            Axis::Rows => MAX_ROWS,
            Axis::Cols => MAX_COLS,
        }
    }

    fn of(self, addr: CellAddr) -> u32 {
        match self {
            Axis::Rows => addr.row,
            Axis::Cols => addr.col,
        }
    }

    fn with(self, addr: CellAddr, value: u32) -> CellAddr {
        match self {
            Axis::Rows => CellAddr::new(value, addr.col),
            Axis::Cols => CellAddr::new(addr.row, value),
        }
    }
}

/// A structural edit on one sheet, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOperation {
    InsertRows { before: u32, count: u32 },
    DeleteRows { start: u32, count: u32 },
    InsertColumns { before: u32, count: u32 },
    DeleteColumns { start: u32, count: u32 },
}

impl ShiftOperation {
    pub fn axis(&self) -> Axis {
        match self {
            ShiftOperation::InsertRows { .. } | ShiftOperation::DeleteRows { .. } => Axis::Rows,
            ShiftOperation::InsertColumns { .. } | ShiftOperation::DeleteColumns { .. } => {
                Axis::Cols
            }
        }
    }

    fn is_insert(&self) -> bool {
        matches!(
            self,
            ShiftOperation::InsertRows { .. } | ShiftOperation::InsertColumns { .. }
        )
    }

    fn pivot_and_count(&self) -> (u32, u32) {
        match *self {
            ShiftOperation::InsertRows { before, count }
            | ShiftOperation::InsertColumns { before, count } => (before, count),
            ShiftOperation::DeleteRows { start, count }
            | ShiftOperation::DeleteColumns { start, count } => (start, count),
        }
    }

    /// New position of an index on the shifted axis; `None` when the index
    /// was deleted or pushed past the grid.
    pub fn map_index(&self, index: u32) -> Option<u32> {
        let (pivot, count) = self.pivot_and_count();
        if self.is_insert() {
            if index < pivot {
                return Some(index);
            }
            let moved = index.checked_add(count)?;
            (moved < self.axis().limit()).then_some(moved)
        } else {
            let end = pivot.saturating_add(count);
            if index < pivot {
                Some(index)
            } else if index < end {
                None
            } else {
                Some(index - count)
            }
        }
    }

    /// New bounds of an inclusive span. Insertions inside the span grow it,
    /// partial deletions shrink it, a span wholly deleted yields `None`.
    pub fn map_span(&self, lo: u32, hi: u32) -> Option<(u32, u32)> {
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        let (pivot, count) = self.pivot_and_count();
        if self.is_insert() {
            let new_lo = self.map_index(lo)?;
            let last = self.axis().limit() - 1;
            let new_hi = if hi < pivot {
                hi
            } else {
                hi.saturating_add(count).min(last)
            };
            return Some((new_lo, new_hi));
        }
        let end = pivot.saturating_add(count);
        if lo >= pivot && hi < end {
            return None;
        }
        let new_lo = if lo < pivot {
            lo
        } else if lo < end {
            pivot
        } else {
            lo - count
        };
        let new_hi = if hi < pivot {
            hi
        } else if hi < end {
            pivot - 1
        } else {
            hi - count
        };
        Some((new_lo, new_hi))
    }
}

/// One side of an A1 reference; either coordinate may be missing for whole
/// row (`3:5`) or whole column (`B:D`) ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefPart {
    col: Option<(u32, bool)>,
    row: Option<(u32, bool)>,
}

impl RefPart {
    fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        let mut i = 0usize;
        let lead_dollar = bytes.first() == Some(&b'$');
        if lead_dollar {
            i += 1;
        }
        let letters_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let letters = &s[letters_start..i];
        let mut row_abs = letters.is_empty() && lead_dollar;
        let col = if letters.is_empty() {
            None
        } else {
            Some((letters_to_col(letters)?, lead_dollar))
        };
        if col.is_some() && bytes.get(i) == Some(&b'$') {
            row_abs = true;
            i += 1;
        }
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i != bytes.len() {
            return None;
        }
        let digits = &s[digits_start..i];
        let row = if digits.is_empty() {
            if row_abs {
                return None;
            }
            None
        } else {
            let one_based: u32 = digits.parse().ok()?;
            if one_based == 0 || one_based > MAX_ROWS {
                return None;
            }
            Some((one_based - 1, row_abs))
        };
        if col.is_none() && row.is_none() {
            return None;
        }
        Some(Self { col, row })
    }

    fn coord(&self, axis: Axis) -> Option<u32> {
        match axis {
            Axis::Rows => self.row.map(|(r, _)| r),
            Axis::Cols => self.col.map(|(c, _)| c),
        }
    }

    fn set_coord(&mut self, axis: Axis, value: u32) {
        match axis {
            Axis::Rows => {
                if let Some((_, abs)) = self.row {
                    self.row = Some((value, abs));
                }
            }
            Axis::Cols => {
                if let Some((_, abs)) = self.col {
                    self.col = Some((value, abs));
                }
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some((col, abs)) = self.col {
            if abs {
                out.push('$');
            }
            out.push_str(&col_to_letters(col));
        }
        if let Some((row, abs)) = self.row {
            if abs {
                out.push('$');
            }
            out.push_str(&(row + 1).to_string());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefTarget {
    Cell(RefPart),
    Range(RefPart, RefPart),
}

impl RefTarget {
    fn parse(target: &str) -> Option<Self> {
        match target.split_once(':') {
            None => {
                let part = RefPart::parse(target)?;
                (part.col.is_some() && part.row.is_some()).then_some(RefTarget::Cell(part))
            }
            Some((a, b)) => {
                let (a, b) = (RefPart::parse(a)?, RefPart::parse(b)?);
                let same_shape = a.col.is_some() == b.col.is_some() && a.row.is_some() == b.row.is_some();
                same_shape.then_some(RefTarget::Range(a, b))
            }
        }
    }

    /// Adjusted reference text, or `None` when it no longer points anywhere.
    fn shifted(&self, op: &ShiftOperation) -> Option<String> {
        let axis = op.axis();
        match *self {
            RefTarget::Cell(mut part) => {
                if let Some(coord) = part.coord(axis) {
                    part.set_coord(axis, op.map_index(coord)?);
                }
                Some(part.render())
            }
            RefTarget::Range(mut a, mut b) => {
                if let (Some(ca), Some(cb)) = (a.coord(axis), b.coord(axis)) {
                    let (lo, hi) = op.map_span(ca, cb)?;
                    if ca <= cb {
                        a.set_coord(axis, lo);
                        b.set_coord(axis, hi);
                    } else {
                        a.set_coord(axis, hi);
                        b.set_coord(axis, lo);
                    }
                }
                Some(format!("{}:{}", a.render(), b.render()))
            }
        }
    }
}

/// Whether `target` reads as an A1 cell or range (without sheet qualifier).
pub(crate) fn is_reference_text(target: &str) -> bool {
    RefTarget::parse(target).is_some()
}

/// Rewrite one formula for a structural edit on `edited_sheet`.
/// `host_is_edited` says whether the formula lives on that sheet, in which
/// case unqualified references are adjusted too. Absolute references move
/// with the cells they name.
pub fn adjust_formula(
    formula: &str,
    op: &ShiftOperation,
    edited_sheet: &str,
    host_is_edited: bool,
) -> Result<String, FormulaError> {
    rewrite_references(formula, |reference: &ReferenceToken<'_>| {
        let applies = match reference.sheet.as_deref() {
            Some(sheet) => sheet_names_eq(sheet, edited_sheet),
            None => host_is_edited,
        };
        if !applies {
            return None;
        }
        let target = RefTarget::parse(reference.target)?;
        let prefix = &reference.text[..reference.text.len() - reference.target.len()];
        Some(match target.shifted(op) {
            Some(shifted) => format!("{prefix}{shifted}"),
            None => REF_ERROR.to_string(),
        })
    })
}

/// Cells whose formula text changed, by sheet index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftOutcome {
    pub rewritten: Vec<(usize, CellAddr)>,
    /// Cells discarded because they were deleted or fell off the grid.
    pub dropped: usize,
}

/// Apply `op` to `sheets[index]`: move cells, merges and dimension
/// overrides, rebuild the used range, and adjust every formula in the
/// workbook that points into the edited sheet.
pub fn shift_sheet(sheets: &mut [Sheet], index: usize, op: &ShiftOperation) -> ShiftOutcome {
    let axis = op.axis();
    let mut outcome = ShiftOutcome::default();
    let Some(sheet) = sheets.get_mut(index) else {
        return outcome;
    };
    let edited_name = sheet.name.clone();

    let mut pushed_off_grid = false;
    let cells = std::mem::take(&mut sheet.cells);
    for (addr, cell) in cells {
        match op.map_index(axis.of(addr)) {
            Some(moved) => {
                sheet.cells.insert(axis.with(addr, moved), cell);
            }
            None => {
                outcome.dropped += 1;
                if op.is_insert() {
                    pushed_off_grid = true;
                }
            }
        }
    }

    sheet.merges = sheet
        .merges
        .iter()
        .filter_map(|merge| shift_merge(merge, op))
        .collect();

    let dims = match axis {
        Axis::Rows => &mut sheet.row_heights,
        Axis::Cols => &mut sheet.col_widths,
    };
    *dims = std::mem::take(dims)
        .into_iter()
        .filter_map(|(key, size)| op.map_index(key).map(|k| (k, size)))
        .collect::<BTreeMap<_, _>>();

    let frozen = match axis {
        Axis::Rows => &mut sheet.frozen_rows,
        Axis::Cols => &mut sheet.frozen_cols,
    };
    if *frozen > 0 {
        *frozen = op
            .map_span(0, *frozen - 1)
            .map(|(_, hi)| hi + 1)
            .unwrap_or(0);
    }

    sheet.rebuild_used_range();
    if pushed_off_grid && let Some(range) = sheet.used_range.as_mut() {
        match axis {
            Axis::Rows => range.end_row = MAX_ROWS - 1,
            Axis::Cols => range.end_col = MAX_COLS - 1,
        }
    }

    for (sheet_index, host) in sheets.iter_mut().enumerate() {
        let host_is_edited = sheet_index == index;
        let mut updates = Vec::new();
        for (addr, formula) in host.formula_cells() {
            match adjust_formula(formula, op, &edited_name, host_is_edited) {
                Ok(adjusted) if adjusted != formula => updates.push((addr, adjusted)),
                Ok(_) => {}
                Err(err) => {
                    warn!(sheet = %host.name, cell = %addr, error = %err, "formula left unadjusted");
                }
            }
        }
        for (addr, adjusted) in updates {
            host.set_formula(addr, adjusted);
            outcome.rewritten.push((sheet_index, addr));
        }
    }
    outcome
}

fn shift_merge(merge: &MergeRange, op: &ShiftOperation) -> Option<MergeRange> {
    let mut out = *merge;
    match op.axis() {
        Axis::Rows => {
            let (lo, hi) = op.map_span(merge.start_row, merge.end_row)?;
            out.start_row = lo;
            out.end_row = hi;
        }
        Axis::Cols => {
            let (lo, hi) = op.map_span(merge.start_col, merge.end_col)?;
            out.start_col = lo;
            out.end_col = hi;
        }
    }
    let single = out.start_row == out.end_row && out.start_col == out.end_col;
    (!single).then_some(out)
}

/// Stable sort of the rows of `range` by the value in absolute column
/// `column`. Formula cells sort by their computed result; blanks stay last
/// in both directions. Each row moves as an opaque tuple.
pub fn sort_range(sheet: &mut Sheet, range: RangeAddr, column: u32, ascending: bool) {
    // Trailing empty rows and columns stay put; only the occupied part moves.
    let Some(range) = occupied_part(sheet, range) else {
        return;
    };
    let cols = range.start.col..=range.end.col;
    let mut rows: Vec<Vec<Option<sheetmend_common::Cell>>> = (range.start.row..=range.end.row)
        .map(|row| {
            cols.clone()
                .map(|col| sheet.cells.remove(&CellAddr::new(row, col)))
                .collect()
        })
        .collect();

    let key_offset = column.saturating_sub(range.start.col) as usize;
    let sort_key = |row: &Vec<Option<sheetmend_common::Cell>>| -> CellValue {
        row.get(key_offset)
            .and_then(Option::as_ref)
            .map(|cell| {
                if cell.is_formula() {
                    cell.computed_value.clone()
                } else {
                    cell.value.clone()
                }
            })
            .unwrap_or_default()
    };
    rows.sort_by(|a, b| {
        let (ka, kb) = (sort_key(a), sort_key(b));
        match (ka.is_null(), kb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if ascending => ka.sort_cmp(&kb),
            (false, false) => kb.sort_cmp(&ka),
        }
    });

    for (offset, row) in rows.into_iter().enumerate() {
        let row_index = range.start.row + offset as u32;
        for (col, cell) in cols.clone().zip(row) {
            if let Some(cell) = cell {
                sheet.cells.insert(CellAddr::new(row_index, col), cell);
            }
        }
    }
    sheet.rebuild_used_range();
}

fn occupied_part(sheet: &Sheet, range: RangeAddr) -> Option<RangeAddr> {
    let (last_row, last_col) = sheet
        .cells
        .keys()
        .filter(|addr| range.contains(**addr))
        .fold(None, |acc: Option<(u32, u32)>, addr| match acc {
            Some((r, c)) => Some((r.max(addr.row), c.max(addr.col))),
            None => Some((addr.row, addr.col)),
        })?;
    Some(RangeAddr::new(range.start, CellAddr::new(last_row, last_col)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmend_common::Cell;

    fn insert_rows(before: u32, count: u32) -> ShiftOperation {
        ShiftOperation::InsertRows { before, count }
    }

    #[test]
    fn formula_references_follow_inserted_rows() {
        let op = insert_rows(1, 2);
        let out = adjust_formula("=SUM(A1:A3)+$B$2+C1", &op, "Sheet1", true).unwrap();
        assert_eq!(out, "=SUM(A1:A5)+$B$4+C1");
    }

    #[test]
    fn deleted_references_become_ref_errors() {
        let op = ShiftOperation::DeleteRows { start: 1, count: 2 };
        let out = adjust_formula("=A2+A4+SUM(A1:A3)", &op, "Sheet1", true).unwrap();
        assert_eq!(out, "=#REF!+A2+SUM(A1:A1)");
    }

    #[test]
    fn only_matching_qualifiers_move_on_other_sheets() {
        let op = ShiftOperation::InsertColumns { before: 0, count: 1 };
        let out = adjust_formula("='Sheet 1'!A1+A1+Other!A1", &op, "sheet 1", false).unwrap();
        assert_eq!(out, "='Sheet 1'!B1+A1+Other!A1");
    }

    #[test]
    fn whole_row_ranges_ignore_column_shifts() {
        let op = ShiftOperation::InsertColumns { before: 0, count: 1 };
        let out = adjust_formula("=SUM(2:3)+SUM(A:B)", &op, "S", true).unwrap();
        assert_eq!(out, "=SUM(2:3)+SUM(B:C)");
    }

    #[test]
    fn names_and_strings_are_untouched() {
        let op = insert_rows(0, 1);
        let out = adjust_formula("=Revenue*A1&\"A1\"", &op, "S", true).unwrap();
        assert_eq!(out, "=Revenue*A2&\"A1\"");
    }

    #[test]
    fn shift_moves_cells_merges_and_dimensions() {
        let mut sheet = Sheet::new("s1", "Sheet1");
        sheet.set_value(CellAddr::new(0, 0), 1.0.into());
        sheet.set_value(CellAddr::new(2, 0), 2.0.into());
        sheet.set_formula(CellAddr::new(3, 0), "=A1+A3".into());
        sheet.merges.push(MergeRange::from_range(RangeAddr::from_a1("B2:C3").unwrap()));
        sheet.row_heights.insert(2, 30.0);
        let mut sheets = vec![sheet];

        let outcome = shift_sheet(&mut sheets, 0, &insert_rows(1, 1));
        let sheet = &sheets[0];
        assert_eq!(sheet.cell(CellAddr::new(3, 0)).unwrap().value, CellValue::Number(2.0));
        assert_eq!(
            sheet.cell(CellAddr::new(4, 0)).unwrap().formula.as_deref(),
            Some("=A1+A4")
        );
        assert_eq!(sheet.merges[0].to_range().to_string(), "B3:C4");
        assert_eq!(sheet.row_heights.get(&3), Some(&30.0));
        assert_eq!(outcome.rewritten, vec![(0, CellAddr::new(4, 0))]);
    }

    #[test]
    fn merges_inside_deleted_band_are_dropped() {
        let mut sheet = Sheet::new("s1", "S");
        sheet.merges.push(MergeRange::from_range(RangeAddr::from_a1("A2:B3").unwrap()));
        sheet.merges.push(MergeRange::from_range(RangeAddr::from_a1("D1:D4").unwrap()));
        let mut sheets = vec![sheet];
        shift_sheet(&mut sheets, 0, &ShiftOperation::DeleteRows { start: 1, count: 2 });
        assert_eq!(sheets[0].merges.len(), 1);
        assert_eq!(sheets[0].merges[0].to_range().to_string(), "D1:D2");
    }

    #[test]
    fn sort_keeps_rows_together_and_blanks_last() {
        let mut sheet = Sheet::new("s1", "S");
        for (row, (key, label)) in [(3.0, "c"), (1.0, "a"), (2.0, "b")].into_iter().enumerate() {
            sheet.set_value(CellAddr::new(row as u32, 0), key.into());
            sheet.set_value(CellAddr::new(row as u32, 1), label.into());
        }
        sheet.set_value(CellAddr::new(3, 1), "blank key".into());
        sheet.cells.insert(CellAddr::new(4, 0), Cell::from_value(0.5));

        sort_range(&mut sheet, RangeAddr::from_a1("A1:B5").unwrap(), 0, false);
        let labels: Vec<_> = (0..5)
            .map(|r| sheet.cell(CellAddr::new(r, 1)).map(|c| c.value.to_string()))
            .collect();
        assert_eq!(
            labels,
            vec![
                Some("c".into()),
                Some("b".into()),
                Some("a".into()),
                None,
                Some("blank key".into())
            ]
        );
    }

    #[test]
    fn whole_sheet_sort_only_moves_occupied_rows() {
        let mut sheet = Sheet::new("s1", "S");
        sheet.set_value(CellAddr::new(0, 0), 2.0.into());
        sheet.set_value(CellAddr::new(2, 0), 1.0.into());
        sort_range(&mut sheet, RangeAddr::from_a1("A1:XFD1048576").unwrap(), 0, true);
        assert_eq!(sheet.cell(CellAddr::new(0, 0)).unwrap().value, CellValue::Number(1.0));
        assert_eq!(sheet.cell(CellAddr::new(1, 0)).unwrap().value, CellValue::Number(2.0));
        assert!(sheet.cell(CellAddr::new(2, 0)).is_none());
    }

    #[test]
    fn span_mapping_handles_partial_deletes() {
        let op = ShiftOperation::DeleteColumns { start: 2, count: 3 };
        assert_eq!(op.map_span(0, 3), Some((0, 1)));
        assert_eq!(op.map_span(3, 7), Some((2, 4)));
        assert_eq!(op.map_span(2, 4), None);
        assert_eq!(op.map_index(5), Some(2));
    }
}
