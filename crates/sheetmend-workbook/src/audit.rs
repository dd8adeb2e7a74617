//! Post-edit formula audit with three phases: deterministic local repairs,
//! escalation to an injected correction callback, then a final re-scan.
//!
//! The loop never fails the caller. Correction failures are logged and the
//! affected findings simply stay unresolved.

use crate::applicator::ApplyResult;
use crate::collaborators::CorrectionCallback;
use crate::config::AuditConfig;
use crate::error::{Result, SheetMendError};
use crate::structural::is_reference_text;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use serde::Serialize;
use sheetmend_common::formula::{bare_operands, rewrite_references};
use sheetmend_common::{
    Action, CellAddr, CellValue, Sheet, WorkbookTier, quote_sheet_name, resolve_sheet,
};
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// The computed value is a formula-engine error token.
    FormulaError,
    /// A formula cell with no computed result.
    NullFormula,
    /// A literal the batch wrote did not stick.
    EmptyExpectedValue,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingKind::FormulaError => "formula_error",
            FindingKind::NullFormula => "null_formula",
            FindingKind::EmptyExpectedValue => "empty_expected_value",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub sheet_id: String,
    pub sheet_name: String,
    pub cell: CellAddr,
    pub kind: FindingKind,
    pub observed: CellValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<CellValue>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{} [{}] observed `{}`", self.sheet_name, self.cell, self.kind, self.observed)?;
        if let Some(formula) = &self.formula {
            write!(f, " formula `{formula}`")?;
        }
        if let Some(expected) = &self.expected {
            write!(f, " expected `{expected}`")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Passed,
    PassedWithCorrections,
    FailedWithUnresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub status: AuditStatus,
    pub passed: bool,
    /// Findings still present after the final check.
    pub findings: Vec<Finding>,
    /// Corrections whose finding was gone on the following scan.
    pub corrections_made: usize,
    pub local_passes: usize,
    pub escalated: bool,
    pub message: String,
}

impl AuditReport {
    fn failed(message: String) -> Self {
        Self {
            status: AuditStatus::FailedWithUnresolved,
            passed: false,
            findings: Vec::new(),
            corrections_made: 0,
            local_passes: 0,
            escalated: false,
            message,
        }
    }
}

/// What the loop needs from the service that owns the workbook.
pub trait AuditTarget {
    fn current_sheets(&self, workbook_id: &str) -> Result<Vec<Sheet>>;

    fn workbook_tier(&self, workbook_id: &str) -> WorkbookTier;

    /// Apply repair actions as their own batch.
    fn apply_corrections(&self, workbook_id: &str, actions: Vec<Action>) -> Result<ApplyResult>;
}

/// Cells the scan looks at, and the literals the batch meant to leave there.
#[derive(Debug, Clone, Default)]
struct Scope {
    cells: Option<BTreeSet<CellAddr>>,
    expected: FxHashMap<CellAddr, CellValue>,
}

impl Scope {
    fn from_actions(actions: &[Action], sheets: &[Sheet], sheet: &Sheet, limit: usize) -> Self {
        let mut scope = Scope::default();
        let mut cells = BTreeSet::new();
        for action in actions {
            let on_sheet = action
                .sheet_target()
                .and_then(|target| resolve_sheet(sheets, target))
                .is_some_and(|s| s.id == sheet.id);
            if !on_sheet {
                continue;
            }
            match action {
                Action::SetCell {
                    cell,
                    value,
                    formula,
                    ..
                } => {
                    let anchor = sheet.resolve_anchor(*cell);
                    cells.insert(anchor);
                    scope.expect(anchor, value, formula.is_some());
                }
                Action::SetRange { range, values, .. } => {
                    for (r, row) in values.iter().enumerate() {
                        for (c, value) in row.iter().enumerate() {
                            let Some(addr) = range.start.offset(r as u32, c as u32) else {
                                continue;
                            };
                            if sheet.resolve_anchor(addr) == addr {
                                cells.insert(addr);
                                scope.expect(addr, value, false);
                            }
                        }
                    }
                }
                Action::FormatCells { range, .. } => {
                    cells.extend(range.cells().take(limit));
                }
                Action::MergeCells { range, .. } | Action::UnmergeCells { range, .. } => {
                    cells.insert(range.start);
                }
                // Addresses recorded before a shift or sort no longer line up.
                _ => return Scope::default(),
            }
            if cells.len() > limit {
                return Scope::default();
            }
        }
        if !cells.is_empty() {
            scope.cells = Some(cells);
        }
        scope
    }

    fn expect(&mut self, addr: CellAddr, value: &CellValue, has_formula: bool) {
        if has_formula || value.is_null() || value.formula_text().is_some() {
            self.expected.remove(&addr);
        } else {
            self.expected.insert(addr, value.clone());
        }
    }
}

fn check_cell(sheet: &Sheet, addr: CellAddr, expected: Option<&CellValue>) -> Option<Finding> {
    let cell = sheet.cell(addr);
    let finding = |kind, observed: &CellValue| Finding {
        sheet_id: sheet.id.clone(),
        sheet_name: sheet.name.clone(),
        cell: addr,
        kind,
        observed: observed.clone(),
        formula: cell.and_then(|c| c.formula.clone()),
        expected: expected.cloned(),
    };
    match cell {
        Some(c) if c.is_formula() => {
            if c.computed_value.error_token().is_some() {
                Some(finding(FindingKind::FormulaError, &c.computed_value))
            } else if c.computed_value.is_null() {
                Some(finding(FindingKind::NullFormula, &c.computed_value))
            } else {
                None
            }
        }
        Some(c) if expected.is_some() && c.value.is_null() => {
            Some(finding(FindingKind::EmptyExpectedValue, &c.value))
        }
        None if expected.is_some() => Some(finding(FindingKind::EmptyExpectedValue, &CellValue::Null)),
        _ => None,
    }
}

fn scan(sheet: &Sheet, scope: &Scope, limit: usize) -> Vec<Finding> {
    match &scope.cells {
        Some(cells) => cells
            .iter()
            .filter_map(|addr| check_cell(sheet, *addr, scope.expected.get(addr)))
            .collect(),
        None => sheet
            .formula_cells()
            .take(limit)
            .filter_map(|(addr, _)| check_cell(sheet, addr, None))
            .collect(),
    }
}

const TYPOS: &[(&str, &str)] = &[
    ("VLOKUP", "VLOOKUP"),
    ("VLOOKP", "VLOOKUP"),
    ("VLOOUKP", "VLOOKUP"),
    ("HLOKUP", "HLOOKUP"),
    ("SUMM", "SUM"),
    ("SUMIFF", "SUMIF"),
    ("AVERGE", "AVERAGE"),
    ("AVERAG", "AVERAGE"),
    ("AVG", "AVERAGE"),
    ("CONUT", "COUNT"),
    ("COUNTT", "COUNT"),
    ("IFERORR", "IFERROR"),
    ("IFEROR", "IFERROR"),
    ("INDX", "INDEX"),
    ("MATHC", "MATCH"),
    ("ROUDN", "ROUND"),
    ("CONCATENAT", "CONCATENATE"),
];

static TYPO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<&str> = TYPOS.iter().map(|(typo, _)| *typo).collect();
    Regex::new(&format!(r"(?i)\b({})(\s*\()", alternatives.join("|")))
        .expect("typo regex must compile")
});

fn fix_function_typos(formula: &str) -> String {
    TYPO_PATTERN
        .replace_all(formula, |caps: &Captures<'_>| {
            let written = caps[1].to_ascii_uppercase();
            let fixed = TYPOS
                .iter()
                .find(|(typo, _)| *typo == written)
                .map_or(&caps[1], |(_, fixed)| *fixed);
            format!("{fixed}{}", &caps[2])
        })
        .into_owned()
}

/// `My Sheet!A1` -> `'My Sheet'!A1` for every sheet whose name needs quotes.
fn quote_sheet_qualifiers(formula: &str, sheets: &[Sheet]) -> String {
    let mut out = formula.to_string();
    for sheet in sheets {
        let quoted = quote_sheet_name(&sheet.name);
        if quoted == sheet.name {
            continue;
        }
        let pattern = format!(r"(?i)(^|[^'A-Za-z0-9_.]){}!", regex::escape(&sheet.name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        out = re
            .replace_all(&out, |caps: &Captures<'_>| format!("{}{quoted}!", &caps[1]))
            .into_owned();
    }
    out
}

/// Wrap bare words that are not cell references in string quotes:
/// `=IF(A1=yes,1,0)` -> `=IF(A1="yes",1,0)`.
fn quote_bare_words(formula: &str) -> Option<String> {
    let words: Vec<String> = bare_operands(formula)
        .ok()?
        .into_iter()
        .filter(|op| !is_reference_text(op) && op.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .collect();
    if words.is_empty() {
        return None;
    }
    rewrite_references(formula, |reference| {
        (reference.sheet.is_none() && words.iter().any(|w| w == reference.text))
            .then(|| format!("\"{}\"", reference.text))
    })
    .ok()
}

fn repaired_formula(finding: &Finding, formula: &str, sheets: &[Sheet]) -> Option<String> {
    let mut fixed = quote_sheet_qualifiers(formula, sheets);
    fixed = fix_function_typos(&fixed);
    if finding.observed.error_token() == Some("#NAME?")
        && let Some(quoted) = quote_bare_words(&fixed)
    {
        fixed = quoted;
    }
    (fixed != formula).then_some(fixed)
}

/// Deterministic repair for one finding, if a rule applies.
fn local_fix(finding: &Finding, sheets: &[Sheet]) -> Option<Action> {
    let set_cell = |value: CellValue, formula: Option<String>| Action::SetCell {
        sheet_id: finding.sheet_id.clone(),
        cell: finding.cell,
        value,
        formula,
    };
    match finding.kind {
        FindingKind::FormulaError => {
            let formula = finding.formula.as_deref()?;
            repaired_formula(finding, formula, sheets).map(|f| set_cell(CellValue::Null, Some(f)))
        }
        FindingKind::NullFormula => finding
            .formula
            .clone()
            .map(|f| set_cell(CellValue::Null, Some(f))),
        FindingKind::EmptyExpectedValue => finding.expected.clone().map(|v| set_cell(v, None)),
    }
}

fn describe_findings(findings: &[Finding], cap: usize) -> String {
    let mut out = format!("{} formula problem(s) remain after automatic repair:\n", findings.len());
    for finding in findings.iter().take(cap) {
        let _ = writeln!(out, "- {finding}");
    }
    if findings.len() > cap {
        let _ = writeln!(out, "- ... and {} more", findings.len() - cap);
    }
    out
}

fn sheet_context(sheet: &Sheet, sheets: &[Sheet]) -> String {
    let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
    let mut out = format!("Workbook sheets: {}\n", names.join(", "));
    let _ = write!(out, "Sheet `{}` (id {})", sheet.name, sheet.id);
    match sheet.used_range {
        Some(range) => {
            let _ = writeln!(out, ", used range {}", range.to_range());
        }
        None => out.push_str(", empty\n"),
    }
    out
}

fn resolved_count(attempted: &[CellAddr], remaining: &[Finding]) -> usize {
    attempted
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|addr| !remaining.iter().any(|f| f.cell == **addr))
        .count()
}

#[derive(Clone, Default)]
pub struct AuditLoop {
    config: AuditConfig,
    callback: Option<Arc<dyn CorrectionCallback>>,
}

struct Pass<'t> {
    target: &'t dyn AuditTarget,
    workbook_id: &'t str,
    sheet_id: &'t str,
    scope: Scope,
    limit: usize,
}

impl Pass<'_> {
    fn load(&self) -> Result<(Vec<Sheet>, usize)> {
        let sheets = self.target.current_sheets(self.workbook_id)?;
        let index = sheets
            .iter()
            .position(|s| s.id == self.sheet_id)
            .ok_or_else(|| SheetMendError::not_found(format!("sheet `{}`", self.sheet_id)))?;
        Ok((sheets, index))
    }

    fn rescan(&self) -> Result<(Vec<Sheet>, usize, Vec<Finding>)> {
        let (sheets, index) = self.load()?;
        let findings = scan(&sheets[index], &self.scope, self.limit);
        Ok((sheets, index, findings))
    }

    /// Apply as one batch; when that is rejected, fall back to one action
    /// at a time so a single bad repair does not sink the rest.
    fn apply(&self, actions: Vec<Action>) -> Vec<CellAddr> {
        let cells = |actions: &[Action]| -> Vec<CellAddr> {
            actions
                .iter()
                .filter_map(|a| match a {
                    Action::SetCell { cell, .. } => Some(*cell),
                    _ => None,
                })
                .collect()
        };
        match self.target.apply_corrections(self.workbook_id, actions.clone()) {
            Ok(_) => cells(&actions),
            Err(err) => {
                warn!(workbook = self.workbook_id, error = %err, "correction batch rejected; retrying individually");
                let mut applied = Vec::new();
                for action in actions {
                    let cell = cells(std::slice::from_ref(&action));
                    match self.target.apply_corrections(self.workbook_id, vec![action]) {
                        Ok(_) => applied.extend(cell),
                        Err(err) => warn!(workbook = self.workbook_id, error = %err, "correction failed"),
                    }
                }
                applied
            }
        }
    }
}

impl AuditLoop {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn CorrectionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Scan the sheet for breakage left by `original_actions` and try to
    /// repair it. Always returns a report.
    pub fn run(
        &self,
        target: &dyn AuditTarget,
        workbook_id: &str,
        sheet_id: &str,
        original_actions: &[Action],
    ) -> AuditReport {
        let span = info_span!("audit_sheet", workbook = workbook_id, sheet = sheet_id);
        let _enter = span.enter();
        match self.run_phases(target, workbook_id, sheet_id, original_actions) {
            Ok(report) => {
                info!(
                    status = ?report.status,
                    corrections = report.corrections_made,
                    remaining = report.findings.len(),
                    "audit finished"
                );
                report
            }
            Err(err) => {
                warn!(error = %err, "audit could not run");
                AuditReport::failed(format!("audit could not run: {err}"))
            }
        }
    }

    fn run_phases(
        &self,
        target: &dyn AuditTarget,
        workbook_id: &str,
        sheet_id: &str,
        original_actions: &[Action],
    ) -> Result<AuditReport> {
        let limit = self.config.scan_limit_for(target.workbook_tier(workbook_id));
        let mut pass = Pass {
            target,
            workbook_id,
            sheet_id,
            scope: Scope::default(),
            limit,
        };
        let (mut sheets, mut index) = pass.load()?;
        pass.scope = Scope::from_actions(original_actions, &sheets, &sheets[index], limit);
        let mut findings = scan(&sheets[index], &pass.scope, limit);
        let mut corrections_made = 0usize;
        let mut local_passes = 0usize;
        let mut attempted: Vec<Action> = Vec::new();

        while local_passes < self.config.max_local_passes && !findings.is_empty() {
            let fixes: Vec<Action> = findings
                .iter()
                .filter_map(|f| local_fix(f, &sheets))
                .filter(|fix| !attempted.contains(fix))
                .collect();
            if fixes.is_empty() {
                break;
            }
            local_passes += 1;
            debug!(pass = local_passes, fixes = fixes.len(), "applying local repairs");
            attempted.extend(fixes.iter().cloned());
            let touched = pass.apply(fixes);
            let (next_sheets, next_index, next) = pass.rescan()?;
            corrections_made += resolved_count(&touched, &next);
            sheets = next_sheets;
            index = next_index;
            findings = next;
        }

        let mut escalated = false;
        if !findings.is_empty()
            && let Some(callback) = &self.callback
        {
            escalated = true;
            let description = describe_findings(&findings, self.config.max_findings_in_prompt);
            let context = sheet_context(&sheets[index], &sheets);
            match callback.request_corrections(&description, &context) {
                Ok(actions) => {
                    let actions: Vec<Action> = actions
                        .into_iter()
                        .filter(|a| matches!(a, Action::SetCell { .. }))
                        .collect();
                    if !actions.is_empty() {
                        let touched = pass.apply(actions);
                        let (_, _, next) = pass.rescan()?;
                        let flagged: Vec<CellAddr> = touched
                            .into_iter()
                            .filter(|addr| findings.iter().any(|f| f.cell == *addr))
                            .collect();
                        corrections_made += resolved_count(&flagged, &next);
                    }
                }
                Err(err) => warn!(error = %err, "correction callback failed"),
            }
        }

        let (_, _, remaining) = pass.rescan()?;
        let status = match (remaining.is_empty(), corrections_made) {
            (true, 0) => AuditStatus::Passed,
            (true, _) => AuditStatus::PassedWithCorrections,
            (false, _) => AuditStatus::FailedWithUnresolved,
        };
        let message = match status {
            AuditStatus::Passed => "no formula problems found".to_string(),
            AuditStatus::PassedWithCorrections => {
                format!("all formula problems fixed ({corrections_made} correction(s))")
            }
            AuditStatus::FailedWithUnresolved => format!(
                "{} formula problem(s) unresolved after {corrections_made} correction(s)",
                remaining.len()
            ),
        };
        Ok(AuditReport {
            status,
            passed: remaining.is_empty(),
            findings: remaining,
            corrections_made,
            local_passes,
            escalated,
            message,
        })
    }
}
