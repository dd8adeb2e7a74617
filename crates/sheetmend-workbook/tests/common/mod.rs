#![allow(dead_code)]

use sheetmend_workbook::common::{Action, CellAddr, CellValue, Sheet, Workbook};
use sheetmend_workbook::{MemorySheetSource, SheetMendConfig, SheetService};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG=sheetmend_workbook=debug cargo test` shows pipeline logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(a1: &str) -> CellAddr {
    CellAddr::from_a1(a1).expect("valid A1")
}

pub fn set_value(sheet: &str, a1: &str, value: impl Into<CellValue>) -> Action {
    Action::SetCell {
        sheet_id: sheet.to_string(),
        cell: addr(a1),
        value: value.into(),
        formula: None,
    }
}

pub fn set_formula(sheet: &str, a1: &str, formula: &str) -> Action {
    Action::SetCell {
        sheet_id: sheet.to_string(),
        cell: addr(a1),
        value: CellValue::Null,
        formula: Some(formula.to_string()),
    }
}

pub fn sheet(id: &str, name: &str, cells: &[(&str, CellValue)]) -> Sheet {
    let mut sheet = Sheet::new(id, name);
    for (a1, value) in cells {
        match value.formula_text() {
            Some(formula) => sheet.set_formula(addr(a1), formula.to_string()),
            None => sheet.set_value(addr(a1), value.clone()),
        }
    }
    sheet
}

pub fn service_with(workbook: Workbook) -> SheetService {
    service_with_config(workbook, SheetMendConfig::default())
}

pub fn service_with_config(workbook: Workbook, config: SheetMendConfig) -> SheetService {
    init_tracing();
    let source = Arc::new(MemorySheetSource::new());
    source.insert(workbook);
    SheetService::new(config).with_source(source)
}

pub fn computed(service: &SheetService, workbook: &str, sheet_name: &str, a1: &str) -> CellValue {
    let sheets = service.sheets(workbook).expect("workbook loads");
    sheets
        .iter()
        .find(|s| s.name == sheet_name)
        .and_then(|s| s.cell(addr(a1)))
        .map(|c| c.computed_value.clone())
        .unwrap_or_default()
}
