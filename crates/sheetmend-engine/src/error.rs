use sheetmend_common::{CellAddr, FormulaError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("sheet `{0}` is not registered with the formula engine")]
    UnknownSheet(String),
    #[error("formula at {sheet}!{addr} references sheet `{missing}` which is not visible yet")]
    MissingReferencedSheet {
        sheet: String,
        addr: CellAddr,
        missing: String,
    },
    #[error("formula engine rejected {sheet}!{addr}: {message}")]
    Push {
        sheet: String,
        addr: CellAddr,
        message: String,
    },
    #[error("sheet operation on `{sheet}` failed: {message}")]
    Sheet { sheet: String, message: String },
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error(transparent)]
    Formula(#[from] FormulaError),
}
