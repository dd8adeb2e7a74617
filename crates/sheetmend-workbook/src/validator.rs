//! Batch validation. Reads the current sheets, never mutates them; the only
//! in-place change it makes is correcting a SET_RANGE's declared range to the
//! shape of its payload.

use crate::config::ValidatorConfig;
use crate::error::{IssueKind, ValidationIssue};
use serde::Serialize;
use sheetmend_common::formula::{function_names, referenced_sheets};
use sheetmend_common::functions::{is_supported_function, is_volatile_function};
use sheetmend_common::{
    Action, CellAddr, CellValue, MAX_COLS, MAX_ROWS, RangeAddr, Sheet, WorkbookTier,
    col_to_letters, sanitize_sheet_name, sheet_names_eq,
};

/// Dependent formulas listed by name in a DELETE_SHEET warning.
const DEPENDENT_SAMPLE: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// A sheet as the batch sees it at a given action: existing sheets plus the
/// CREATE_SHEETs before it, with renames and deletes replayed in order.
#[derive(Debug, Clone)]
struct SheetView {
    id: Option<String>,
    name: String,
    pending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(
        &self,
        actions: &mut [Action],
        sheets: &[Sheet],
        tier: WorkbookTier,
    ) -> ValidationReport {
        let mut run = Run {
            config: &self.config,
            sheets,
            errors: Vec::new(),
            warnings: Vec::new(),
            views: Vec::new(),
        };

        let max = self.config.max_batch_size_for(tier);
        if actions.len() > max {
            run.errors.push(ValidationIssue::batch(
                IssueKind::BatchTooLarge,
                format!("batch has {} actions; the limit is {max}", actions.len()),
            ));
            return run.finish();
        }
        if actions.len() > self.config.batch_warning_threshold {
            run.warnings.push(ValidationIssue::batch(
                IssueKind::LargeBatch,
                format!(
                    "batch has {} actions; batches above {} may be slow",
                    actions.len(),
                    self.config.batch_warning_threshold
                ),
            ));
        }

        run.views = sheets
            .iter()
            .map(|s| SheetView {
                id: Some(s.id.clone()),
                name: s.name.clone(),
                pending: false,
            })
            .collect();

        for (index, action) in actions.iter_mut().enumerate() {
            run.check(index, action);
        }
        run.finish()
    }
}

struct Run<'a> {
    config: &'a ValidatorConfig,
    sheets: &'a [Sheet],
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    views: Vec<SheetView>,
}

impl Run<'_> {
    fn finish(self) -> ValidationReport {
        ValidationReport {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    fn error(&mut self, index: usize, kind: IssueKind, message: impl Into<String>) {
        self.errors.push(ValidationIssue::at(index, kind, message));
    }

    fn warn(&mut self, index: usize, kind: IssueKind, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::at(index, kind, message));
    }

    fn view_index(&self, target: &str) -> Option<usize> {
        self.views
            .iter()
            .position(|v| v.id.as_deref() == Some(target))
            .or_else(|| self.views.iter().position(|v| sheet_names_eq(&v.name, target)))
    }

    /// Resolve a sheet target, reporting an error when it is unknown.
    fn require_sheet(&mut self, index: usize, target: &str) -> Option<usize> {
        let found = self.view_index(target);
        if found.is_none() {
            self.error(
                index,
                IssueKind::UnknownSheet,
                format!("sheet `{target}` does not exist and is not created by this batch"),
            );
        }
        found
    }

    /// The materialized sheet behind a view, when it already exists.
    fn existing(&self, view: usize) -> Option<&Sheet> {
        let view = self.views.get(view)?;
        if view.pending {
            return None;
        }
        let id = view.id.as_deref()?;
        self.sheets.iter().find(|s| s.id == id)
    }

    fn check_range(&mut self, index: usize, range: &RangeAddr) -> bool {
        if range.in_bounds() {
            return true;
        }
        self.error(
            index,
            IssueKind::OutOfBounds,
            format!("range {range} exceeds the sheet limits ({MAX_ROWS} rows x {MAX_COLS} columns)"),
        );
        false
    }

    /// Slow-range warning; with `materialized`, ranges above the hard cell
    /// limit are rejected.
    fn check_range_size(&mut self, index: usize, range: &RangeAddr, materialized: bool) {
        let cells = range.cell_count();
        if materialized && cells > self.config.max_range_cells {
            self.error(
                index,
                IssueKind::RangeTooLarge,
                format!(
                    "{range} covers {cells} cells; the limit is {}",
                    self.config.max_range_cells
                ),
            );
        } else if cells > self.config.async_range_threshold {
            self.warn(
                index,
                IssueKind::LargeRange,
                format!(
                    "{range} covers {cells} cells; ranges above {} are slow to apply",
                    self.config.async_range_threshold
                ),
            );
        }
    }

    fn check_name_free(&mut self, index: usize, name: &str, except: usize) {
        let clash = self
            .views
            .iter()
            .enumerate()
            .any(|(i, v)| i != except && sheet_names_eq(&v.name, name));
        if clash {
            self.error(
                index,
                IssueKind::NameCollision,
                format!("a sheet named `{name}` already exists"),
            );
        }
    }

    fn check_formula(&mut self, index: usize, cell: CellAddr, formula: &str, require_eq: bool) {
        if require_eq && !formula.starts_with('=') {
            self.error(
                index,
                IssueKind::InvalidFormula,
                format!("formula at {cell} must start with `=`"),
            );
            return;
        }
        let names = match function_names(formula) {
            Ok(names) => names,
            Err(err) => {
                self.error(
                    index,
                    IssueKind::InvalidFormula,
                    format!("formula at {cell} is malformed: {err}"),
                );
                return;
            }
        };
        for name in names {
            if !is_supported_function(&name) {
                self.warn(
                    index,
                    IssueKind::UnsupportedFunction,
                    format!("formula at {cell} uses unknown function {name}"),
                );
            } else if is_volatile_function(&name) {
                self.warn(
                    index,
                    IssueKind::VolatileFunction,
                    format!("formula at {cell} uses volatile function {name}, which recalculates on every change"),
                );
            }
        }
    }

    fn check(&mut self, index: usize, action: &mut Action) {
        if let Action::SetRange {
            sheet_id,
            range,
            values,
        } = action
        {
            self.require_sheet(index, sheet_id);
            self.check_set_range(index, range, values);
            return;
        }
        let action: &Action = action;
        match action {
            Action::SetCell {
                sheet_id,
                cell,
                value,
                formula,
            } => {
                self.require_sheet(index, sheet_id);
                if !cell.in_bounds() {
                    self.error(index, IssueKind::OutOfBounds, format!("cell {cell} is outside the sheet"));
                }
                if let Some(formula) = formula.as_deref().or_else(|| value.formula_text()) {
                    self.check_formula(index, *cell, formula, true);
                }
            }
            Action::SetRange { .. } => {}
            Action::CreateSheet { name, sheet_id } => {
                if name.trim().is_empty() {
                    self.error(index, IssueKind::InvalidName, "sheet name must not be blank");
                    return;
                }
                let sanitized = sanitize_sheet_name(name);
                self.check_name_free(index, &sanitized, usize::MAX);
                // Visible to the actions after this one only.
                self.views.push(SheetView {
                    id: sheet_id.clone(),
                    name: sanitized,
                    pending: true,
                });
            }
            Action::DeleteSheet { sheet_id } => {
                let Some(view) = self.require_sheet(index, sheet_id) else {
                    return;
                };
                if self.views.len() <= 1 {
                    self.error(
                        index,
                        IssueKind::LastSheet,
                        "cannot delete the last sheet in the workbook",
                    );
                    return;
                }
                self.warn_dependents(index, view);
                self.views.remove(view);
            }
            Action::RenameSheet { sheet_id, new_name } => {
                let Some(view) = self.require_sheet(index, sheet_id) else {
                    return;
                };
                if new_name.trim().is_empty() {
                    self.error(index, IssueKind::InvalidName, "sheet name must not be blank");
                    return;
                }
                let sanitized = sanitize_sheet_name(new_name);
                self.check_name_free(index, &sanitized, view);
                self.views[view].name = sanitized;
            }
            Action::FormatCells { sheet_id, range, .. } => {
                self.require_sheet(index, sheet_id);
                if self.check_range(index, range) {
                    self.check_range_size(index, range, true);
                }
            }
            Action::UnmergeCells { sheet_id, range } => {
                self.require_sheet(index, sheet_id);
                self.check_range(index, range);
            }
            Action::MergeCells { sheet_id, range } => {
                let view = self.require_sheet(index, sheet_id);
                if self.check_range(index, range) {
                    self.check_range_size(index, range, false);
                    self.check_merge(index, view, *range);
                }
            }
            Action::InsertRows { sheet_id, at, count } => {
                self.require_sheet(index, sheet_id);
                self.check_band(index, "row", *at, *count, MAX_ROWS, false);
            }
            Action::DeleteRows { sheet_id, at, count } => {
                self.require_sheet(index, sheet_id);
                self.check_band(index, "row", *at, *count, MAX_ROWS, true);
            }
            Action::InsertCols { sheet_id, at, count } => {
                self.require_sheet(index, sheet_id);
                self.check_band(index, "column", *at, *count, MAX_COLS, false);
            }
            Action::DeleteCols { sheet_id, at, count } => {
                self.require_sheet(index, sheet_id);
                self.check_band(index, "column", *at, *count, MAX_COLS, true);
            }
            Action::SortRange {
                sheet_id,
                range,
                column,
                ..
            } => {
                self.require_sheet(index, sheet_id);
                if !self.check_range(index, range) {
                    return;
                }
                if *column < range.start.col || *column > range.end.col {
                    self.error(
                        index,
                        IssueKind::InvalidRange,
                        format!("sort column {} lies outside {range}", col_to_letters(*column)),
                    );
                }
                self.check_range_size(index, range, false);
            }
        }
    }

    fn check_band(&mut self, index: usize, what: &str, at: u32, count: u32, limit: u32, deleting: bool) {
        if count == 0 {
            self.error(index, IssueKind::InvalidRange, format!("{what} count must be at least 1"));
        } else if at >= limit || (deleting && at.saturating_add(count) > limit) {
            self.error(
                index,
                IssueKind::OutOfBounds,
                format!("{what}s {at}..{} exceed the sheet limit of {limit}", at.saturating_add(count)),
            );
        }
    }

    fn check_merge(&mut self, index: usize, view: Option<usize>, range: RangeAddr) {
        if range.cell_count() < 2 {
            self.error(index, IssueKind::InvalidRange, format!("cannot merge the single cell {range}"));
            return;
        }
        let overlaps = view
            .and_then(|v| self.existing(v))
            .map(|sheet| {
                sheet
                    .merges
                    .iter()
                    .any(|m| m.to_range() != range && m.to_range().intersects(&range))
            })
            .unwrap_or(false);
        if overlaps {
            self.error(
                index,
                IssueKind::InvalidRange,
                format!("{range} overlaps an existing merged block"),
            );
        }
    }

    fn check_set_range(&mut self, index: usize, range: &mut RangeAddr, values: &[Vec<CellValue>]) {
        let height = values.len() as u32;
        let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
        if height == 0 || width == 0 {
            self.error(index, IssueKind::InvalidRange, "SET_RANGE payload is empty");
            return;
        }
        if !range.start.in_bounds() {
            self.error(
                index,
                IssueKind::OutOfBounds,
                format!("range start {} is outside the sheet", range.start),
            );
            return;
        }
        let fits_rows = (MAX_ROWS - range.start.row).min(height);
        let fits_cols = (MAX_COLS - range.start.col).min(width);
        if fits_rows < height || fits_cols < width {
            self.warn(
                index,
                IssueKind::OutOfBounds,
                format!("values beyond the sheet limits starting at {} will be dropped", range.start),
            );
        }
        if (range.height(), range.width()) != (height, width) {
            let declared = *range;
            if let Some(actual) = RangeAddr::from_shape(range.start, fits_rows, fits_cols) {
                *range = actual;
                self.warn(
                    index,
                    IssueKind::RangeCorrected,
                    format!("declared range {declared} does not match a {height}x{width} payload; using {actual}"),
                );
            }
        }
        if range.cell_count() > self.config.async_range_threshold {
            self.warn(
                index,
                IssueKind::LargeRange,
                format!(
                    "{range} writes {} cells; ranges above {} are slow to apply",
                    range.cell_count(),
                    self.config.async_range_threshold
                ),
            );
        }
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if let Some(formula) = value.formula_text()
                    && let Some(cell) = range.start.offset(r as u32, c as u32)
                {
                    self.check_formula(index, cell, formula, false);
                }
            }
        }
    }

    /// Warn about formulas on other sheets that will break when the sheet
    /// behind `view` goes away.
    fn warn_dependents(&mut self, index: usize, view: usize) {
        let target_name = self.views[view].name.clone();
        let target_id = self.views[view].id.clone();
        let mut affected: Vec<String> = Vec::new();
        for sheet in self.sheets {
            if target_id.as_deref() == Some(sheet.id.as_str()) {
                continue;
            }
            for (addr, formula) in sheet.formula_cells() {
                let refers = match referenced_sheets(formula) {
                    Ok(names) => names.iter().any(|n| sheet_names_eq(n, &target_name)),
                    Err(_) => formula.to_lowercase().contains(&format!("{}!", target_name.to_lowercase())),
                };
                if refers {
                    affected.push(format!("{}!{addr}", sheet.name));
                }
            }
        }
        if affected.is_empty() {
            return;
        }
        let sample = affected
            .iter()
            .take(DEPENDENT_SAMPLE)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let more = affected.len().saturating_sub(DEPENDENT_SAMPLE);
        let tail = if more > 0 { format!(" and {more} more") } else { String::new() };
        self.warn(
            index,
            IssueKind::DependentFormulas,
            format!(
                "{} formula(s) reference sheet `{target_name}` and will break: {sample}{tail}",
                affected.len()
            ),
        );
    }
}
