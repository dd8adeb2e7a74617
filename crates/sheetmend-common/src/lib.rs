//! Shared model for the sheetmend mutation pipeline: cells, sheets, A1
//! addressing, the closed action set, and formula text helpers.

pub mod action;
pub mod address;
pub mod formula;
pub mod functions;
pub mod limits;
pub mod sheet;
pub mod sheet_name;
pub mod value;
pub mod workbook;

pub use action::{Action, ActionBatch, BatchSource, TargetRevision};
pub use address::{AddressError, CellAddr, RangeAddr, col_to_letters, letters_to_col};
pub use formula::{FormulaError, ReferenceToken, quote_sheet_name, rewrite_references};
pub use limits::{MAX_COLS, MAX_ROWS, MAX_SHEET_NAME_LEN};
pub use sheet::{Cell, CellFormat, CellKind, MergeRange, Sheet, UsedRange};
pub use sheet_name::{sanitize_sheet_name, sheet_names_eq, unique_sheet_name};
pub use value::{CellValue, ERROR_TOKENS, error_token};
pub use workbook::{Workbook, WorkbookTier, resolve_sheet, resolve_sheet_index};
