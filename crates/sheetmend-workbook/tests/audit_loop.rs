mod common;

use common::*;
use parking_lot::Mutex;
use sheetmend_workbook::common::{Action, ActionBatch, BatchSource, CellValue, Workbook};
use sheetmend_workbook::{AuditStatus, CorrectionCallback, CorrectionError, FindingKind};
use std::sync::Arc;

fn numbers_workbook() -> Workbook {
    Workbook::new(
        "wb",
        vec![sheet("s1", "Sheet1", &[("B1", 2.0.into()), ("B2", 3.0.into())])],
    )
}

#[test]
fn local_typo_fix_passes_with_corrections() {
    let service = service_with(numbers_workbook());
    let outcome = service
        .run_automated_edit(ActionBatch::new(
            "wb",
            BatchSource::Ai,
            vec![set_formula("s1", "A1", "=SUMM(B1:B2)")],
        ))
        .expect("edit applies even with a broken formula");
    assert_eq!(outcome.audits.len(), 1);
    let report = &outcome.audits[0];
    assert_eq!(report.status, AuditStatus::PassedWithCorrections, "{}", report.message);
    assert_eq!(report.corrections_made, 1);
    assert!(report.passed);
    assert!(!report.escalated);

    let sheets = service.sheets("wb").unwrap();
    let a1 = sheets[0].cell(addr("A1")).unwrap();
    assert_eq!(a1.formula.as_deref(), Some("=SUM(B1:B2)"));
    assert_eq!(a1.computed_value, CellValue::Number(5.0));
    // The edit and its correction are separate revisions.
    assert_eq!(service.list_revisions("wb").len(), 2);
}

#[test]
fn re_audit_without_edits_makes_no_corrections() {
    let service = service_with(numbers_workbook());
    let actions = vec![set_formula("s1", "A1", "=SUMM(B1:B2)")];
    let outcome = service
        .run_automated_edit(ActionBatch::new("wb", BatchSource::Ai, actions.clone()))
        .unwrap();
    assert_eq!(outcome.audits[0].corrections_made, 1);

    let again = service.audit_sheet("wb", "s1", &actions, None);
    assert_eq!(again.corrections_made, 0);
    assert_eq!(again.status, AuditStatus::Passed);
    let revisions = service.list_revisions("wb").len();
    let third = service.audit_sheet("wb", "s1", &actions, None);
    assert_eq!(third.corrections_made, 0);
    assert_eq!(service.list_revisions("wb").len(), revisions);
}

#[test]
fn unresolved_findings_are_reported_without_failing() {
    let service = service_with(numbers_workbook());
    let actions = vec![set_formula("s1", "A1", "=B1/0")];
    let outcome = service
        .run_automated_edit(ActionBatch::new("wb", BatchSource::Ai, actions.clone()))
        .unwrap();
    let report = &outcome.audits[0];
    assert_eq!(report.status, AuditStatus::FailedWithUnresolved);
    assert!(!report.passed);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::FormulaError);
    assert_eq!(report.findings[0].observed, CellValue::from("#DIV/0!"));
    assert_eq!(report.corrections_made, 0);

    // The original edit stays in effect.
    assert_eq!(service.list_revisions("wb").len(), 1);
    let again = service.audit_sheet("wb", "s1", &actions, None);
    assert_eq!(again.corrections_made, 0);
}

#[test]
fn escalation_applies_callback_corrections() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let callback: Arc<dyn CorrectionCallback> = {
        let seen = Arc::clone(&seen);
        Arc::new(move |description: &str, context: &str| -> Result<Vec<Action>, CorrectionError> {
            seen.lock().push(format!("{description}\n{context}"));
            Ok(vec![
                set_formula("s1", "A1", "=B1/B2"),
                Action::DeleteSheet {
                    sheet_id: "s1".into(),
                },
            ])
        })
    };
    let service = service_with(numbers_workbook()).with_callback(callback);
    let outcome = service
        .run_automated_edit(ActionBatch::new(
            "wb",
            BatchSource::Ai,
            vec![set_formula("s1", "A1", "=B1/0")],
        ))
        .unwrap();
    let report = &outcome.audits[0];
    assert!(report.escalated);
    assert_eq!(report.status, AuditStatus::PassedWithCorrections, "{}", report.message);
    assert_eq!(report.corrections_made, 1);

    let prompts = seen.lock();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Sheet1!A1"), "{}", prompts[0]);
    assert!(prompts[0].contains("#DIV/0!"), "{}", prompts[0]);
    // Only SET_CELL corrections are applied.
    assert_eq!(service.sheets("wb").unwrap().len(), 1);
    assert_eq!(computed(&service, "wb", "Sheet1", "A1"), CellValue::Number(2.0 / 3.0));
}

#[test]
fn callback_failures_leave_findings_unresolved() {
    let callback: Arc<dyn CorrectionCallback> = Arc::new(
        |_: &str, _: &str| -> Result<Vec<Action>, CorrectionError> { Err("model unavailable".into()) },
    );
    let service = service_with(numbers_workbook()).with_callback(callback);
    let outcome = service
        .run_automated_edit(ActionBatch::new(
            "wb",
            BatchSource::Ai,
            vec![set_formula("s1", "A1", "=B1/0")],
        ))
        .unwrap();
    let report = &outcome.audits[0];
    assert!(report.escalated);
    assert_eq!(report.status, AuditStatus::FailedWithUnresolved);
}

#[test]
fn unknown_sheets_produce_a_failed_report() {
    let service = service_with(numbers_workbook());
    let report = service.audit_sheet("wb", "missing", &[], None);
    assert_eq!(report.status, AuditStatus::FailedWithUnresolved);
    assert!(report.message.contains("missing"), "{}", report.message);
}

#[test]
fn unquoted_sheet_names_are_quoted() {
    let service = service_with(Workbook::new(
        "wb",
        vec![
            sheet("s1", "Sheet1", &[]),
            sheet("s2", "Q1 Data", &[("A1", 4.0.into())]),
        ],
    ));
    let outcome = service
        .run_automated_edit(ActionBatch::new(
            "wb",
            BatchSource::Ai,
            vec![set_formula("s1", "A1", "=Q1 Data!A1*2")],
        ))
        .unwrap();
    let report = &outcome.audits[0];
    assert!(report.passed, "{}", report.message);
    let sheets = service.sheets("wb").unwrap();
    assert_eq!(
        sheets[0].cell(addr("A1")).unwrap().formula.as_deref(),
        Some("='Q1 Data'!A1*2")
    );
    assert_eq!(computed(&service, "wb", "Sheet1", "A1"), CellValue::Number(8.0));
}
