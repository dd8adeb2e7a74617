mod common;

use common::*;
use sheetmend_workbook::common::{
    Action, ActionBatch, BatchSource, CellValue, RangeAddr, Workbook,
};
use sheetmend_workbook::engine::{EngineInstance, FormualizerEngine};
use sheetmend_workbook::{IssueKind, SheetMendConfig, SheetMendError};

#[test]
fn sum_formula_reports_its_computed_value() {
    let service = service_with(Workbook::new(
        "wb",
        vec![sheet("s1", "Sheet1", &[("B1", 2.0.into()), ("B2", 3.0.into())])],
    ));
    let result = service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![set_formula("s1", "A1", "=SUM(B1:B2)")],
        ))
        .expect("batch applies");

    let a1 = result.changed("Sheet1", "A1").expect("A1 changed");
    assert_eq!(a1.value, CellValue::Number(5.0));
    assert_eq!(a1.formula.as_deref(), Some("=SUM(B1:B2)"));
    assert_eq!(result.version, 0);
    assert!(result.changed("Sheet1", "B1").is_none());
}

#[test]
fn dependents_follow_value_edits() {
    let service = service_with(Workbook::new(
        "wb",
        vec![sheet(
            "s1",
            "Sheet1",
            &[("B1", 2.0.into()), ("B2", 3.0.into()), ("A1", "=SUM(B1:B2)".into())],
        )],
    ));
    service
        .apply_batch(ActionBatch::new("wb", BatchSource::User, vec![set_value("s1", "C1", 1.0)]))
        .unwrap();
    let result = service
        .apply_batch(ActionBatch::new("wb", BatchSource::User, vec![set_value("s1", "B2", 10.0)]))
        .unwrap();
    assert_eq!(result.changed("Sheet1", "A1").unwrap().value, CellValue::Number(12.0));
    assert_eq!(result.changed_cells.len(), 2);
}

#[test]
fn deleting_the_only_sheet_is_rejected() {
    let service = service_with(Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]));
    let batch = ActionBatch::new(
        "wb",
        BatchSource::User,
        vec![Action::DeleteSheet {
            sheet_id: "s1".into(),
        }],
    );
    let report = service.validate(&batch).unwrap();
    assert!(!report.valid);
    assert!(report.errors[0].message.contains("last sheet"));

    let err = match service.apply_batch(batch) {
        Ok(_) => panic!("expected validation error"),
        Err(err) => err,
    };
    match err {
        SheetMendError::Validation { errors } => assert_eq!(errors[0].kind, IssueKind::LastSheet),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(service.get_latest_revision("wb").is_none());
}

#[test]
fn deleting_a_referenced_sheet_warns_with_dependents() {
    let service = service_with(Workbook::new(
        "wb",
        vec![
            sheet("s1", "Sheet1", &[]),
            sheet("s2", "Summary", &[("A1", "='Data'!A1".into())]),
        ],
    ));
    service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::CreateSheet {
                name: "Data".into(),
                sheet_id: None,
            }],
        ))
        .expect("create applies");

    let result = service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::DeleteSheet {
                sheet_id: "Data".into(),
            }],
        ))
        .expect("delete is a warning, not an error");
    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == IssueKind::DependentFormulas)
        .expect("dependent warning");
    assert!(warning.message.contains("Summary!A1"), "{}", warning.message);
    let names: Vec<String> = service.sheets("wb").unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Sheet1", "Summary"]);
}

#[test]
fn writes_inside_a_merge_land_on_its_anchor() {
    let service = service_with(Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]));
    let result = service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![
                Action::MergeCells {
                    sheet_id: "s1".into(),
                    range: RangeAddr::from_a1("B2:D4").unwrap(),
                },
                set_value("s1", "C3", "title"),
            ],
        ))
        .unwrap();
    assert!(result.changed("Sheet1", "B2").is_some());
    assert!(result.changed("Sheet1", "C3").is_none());
    let sheets = service.sheets("wb").unwrap();
    assert!(sheets[0].cell(addr("C3")).is_none());
    assert_eq!(sheets[0].cell(addr("B2")).unwrap().value, CellValue::from("title"));
}

#[test]
fn cross_sheet_formula_to_a_new_sheet_converges() {
    let service = service_with(Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]));
    let result = service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![
                set_formula("s1", "A1", "=Data!B1*2"),
                Action::CreateSheet {
                    name: "Data".into(),
                    sheet_id: None,
                },
                set_value("Data", "B1", 21.0),
            ],
        ))
        .unwrap();
    assert_eq!(result.changed("Sheet1", "A1").unwrap().value, CellValue::Number(42.0));

    let sheets = service.sheets("wb").unwrap();
    let mut fresh = EngineInstance::from_sheets(Box::new(FormualizerEngine::new()), &sheets);
    fresh.recalculate().unwrap();
    assert_eq!(fresh.value("Sheet1", addr("A1")), Some(CellValue::Number(42.0)));
    assert_eq!(computed(&service, "wb", "Sheet1", "A1"), CellValue::Number(42.0));
}

#[test]
fn formulas_to_missing_sheets_surface_as_ref_errors() {
    let service = service_with(Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]));
    service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![set_formula("s1", "A1", "=Nowhere!A1")],
        ))
        .unwrap();
    assert_eq!(computed(&service, "wb", "Sheet1", "A1"), CellValue::from("#REF!"));
}

#[test]
fn inserted_rows_shift_cells_and_formulas() {
    let service = service_with(Workbook::new(
        "wb",
        vec![sheet(
            "s1",
            "Sheet1",
            &[("A1", 1.0.into()), ("A2", 2.0.into()), ("A3", "=SUM(A1:A2)".into())],
        )],
    ));
    service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::InsertRows {
                sheet_id: "s1".into(),
                at: 0,
                count: 1,
            }],
        ))
        .unwrap();
    let sheets = service.sheets("wb").unwrap();
    let sheet = &sheets[0];
    assert!(sheet.cell(addr("A1")).is_none());
    let total = sheet.cell(addr("A4")).unwrap();
    assert_eq!(total.formula.as_deref(), Some("=SUM(A2:A3)"));
    assert_eq!(total.computed_value, CellValue::Number(3.0));
    assert_eq!(sheet.used_range.map(|r| (r.start_row, r.end_row)), Some((1, 3)));
}

#[test]
fn renaming_a_sheet_rewrites_references() {
    let service = service_with(Workbook::new(
        "wb",
        vec![
            sheet("s1", "Data", &[("A1", 7.0.into())]),
            sheet("s2", "Summary", &[("A1", "=Data!A1".into())]),
        ],
    ));
    let result = service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::RenameSheet {
                sheet_id: "s1".into(),
                new_name: "Raw Data".into(),
            }],
        ))
        .unwrap();
    // Only the formula text moved; the visible value did not.
    assert!(result.changed("Summary", "A1").is_none());
    let sheets = service.sheets("wb").unwrap();
    let summary = sheets[1].cell(addr("A1")).unwrap();
    assert_eq!(summary.formula.as_deref(), Some("='Raw Data'!A1"));
    assert_eq!(summary.computed_value, CellValue::Number(7.0));
}

#[test]
fn sorting_moves_rows_and_recomputes() {
    let service = service_with(Workbook::new(
        "wb",
        vec![sheet(
            "s1",
            "Sheet1",
            &[
                ("A1", "pear".into()),
                ("B1", 3.0.into()),
                ("A2", "apple".into()),
                ("B2", 1.0.into()),
                ("D1", "=B1".into()),
            ],
        )],
    ));
    service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::SortRange {
                sheet_id: "s1".into(),
                range: RangeAddr::from_a1("A1:B2").unwrap(),
                column: 1,
                ascending: true,
            }],
        ))
        .unwrap();
    let sheets = service.sheets("wb").unwrap();
    assert_eq!(sheets[0].cell(addr("A1")).unwrap().value, CellValue::from("apple"));
    assert_eq!(computed(&service, "wb", "Sheet1", "D1"), CellValue::Number(1.0));
}

#[test]
fn inserted_rows_clear_values_under_format_only_cells() {
    let service = service_with(Workbook::new(
        "wb",
        vec![sheet(
            "s1",
            "Sheet1",
            &[("A2", 5.0.into()), ("B1", "=SUM(A1:A10)".into())],
        )],
    ));
    service
        .apply_batch(ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![
                Action::FormatCells {
                    sheet_id: "s1".into(),
                    range: RangeAddr::from_a1("A1").unwrap(),
                    format: [("bold".to_string(), serde_json::Value::Bool(true))].into(),
                },
                Action::InsertRows {
                    sheet_id: "s1".into(),
                    at: 0,
                    count: 1,
                },
            ],
        ))
        .unwrap();
    let sheets = service.sheets("wb").unwrap();
    let a2 = sheets[0].cell(addr("A2")).expect("formatted cell moved down");
    assert!(a2.format.is_some());
    assert_eq!(a2.value, CellValue::Null);
    let total = sheets[0].cell(addr("B2")).unwrap();
    assert_eq!(total.formula.as_deref(), Some("=SUM(A2:A11)"));
    assert_eq!(total.computed_value, CellValue::Number(5.0));
}

#[test]
fn writes_before_a_sheet_is_created_are_rejected_up_front() {
    let service = service_with(Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]));
    let actions = vec![
        set_value("Data", "A1", 1.0),
        Action::CreateSheet {
            name: "Data".into(),
            sheet_id: None,
        },
    ];
    match service.apply_batch(ActionBatch::new("wb", BatchSource::User, actions.clone())) {
        Err(SheetMendError::Validation { errors }) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].kind, IssueKind::UnknownSheet);
            assert_eq!(errors[0].action_index, Some(0));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(!service.engines().contains("wb"));
    assert!(service.get_latest_revision("wb").is_none());

    // Automated edits run CREATE_SHEET first, so the same batch applies there.
    let outcome = service
        .run_automated_edit(ActionBatch::new("wb", BatchSource::Ai, actions))
        .unwrap();
    assert_eq!(outcome.apply.version, 0);
    assert_eq!(computed(&service, "wb", "Data", "A1"), CellValue::Number(1.0));
}

#[test]
fn delete_warning_samples_five_dependents_and_counts_the_rest() {
    let dependents: Vec<(String, CellValue)> = (1..=7)
        .map(|row| (format!("A{row}"), CellValue::from("='Data'!A1")))
        .collect();
    let cells: Vec<(&str, CellValue)> = dependents
        .iter()
        .map(|(a1, value)| (a1.as_str(), value.clone()))
        .collect();
    let service = service_with(Workbook::new(
        "wb",
        vec![
            sheet("s1", "Data", &[("A1", 1.0.into())]),
            sheet("s2", "Summary", &cells),
        ],
    ));
    let report = service
        .validate(&ActionBatch::new(
            "wb",
            BatchSource::User,
            vec![Action::DeleteSheet {
                sheet_id: "s1".into(),
            }],
        ))
        .unwrap();
    assert!(report.valid);
    let warning = report
        .warnings
        .iter()
        .find(|w| w.kind == IssueKind::DependentFormulas)
        .expect("dependent warning");
    for listed in ["Summary!A1", "Summary!A5"] {
        assert!(warning.message.contains(listed), "{}", warning.message);
    }
    assert!(!warning.message.contains("Summary!A6"), "{}", warning.message);
    assert!(warning.message.contains("and 2 more"), "{}", warning.message);
    assert!(warning.message.starts_with("7 formula(s)"), "{}", warning.message);
}

#[test]
fn large_set_range_writes_are_flagged() {
    let mut config = SheetMendConfig::default();
    config.validator.async_range_threshold = 100;
    let service = service_with_config(
        Workbook::new("wb", vec![sheet("s1", "Sheet1", &[])]),
        config,
    );
    let block = |rows: usize| Action::SetRange {
        sheet_id: "s1".into(),
        range: RangeAddr::from_shape(addr("A1"), rows as u32, 10).unwrap(),
        values: vec![vec![CellValue::Number(1.0); 10]; rows],
    };

    let small = service
        .validate(&ActionBatch::new("wb", BatchSource::User, vec![block(10)]))
        .unwrap();
    assert!(small.warnings.iter().all(|w| w.kind != IssueKind::LargeRange));

    let result = service
        .apply_batch(ActionBatch::new("wb", BatchSource::User, vec![block(11)]))
        .expect("large writes are a warning, not an error");
    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == IssueKind::LargeRange)
        .expect("large range warning");
    assert_eq!(warning.action_index, Some(0));
    assert!(warning.message.contains("110 cells"), "{}", warning.message);
    assert_eq!(computed(&service, "wb", "Sheet1", "J11"), CellValue::Number(1.0));
}
