//! Batch mutation core for sheetmend workbooks.
//!
//! A batch flows through [`Validator`], then the [`Applicator`] under the
//! workbook's engine instance, and is recorded by the [`RevisionManager`].
//! Automated batches are serialized by the [`ConcurrencyGuard`] and followed
//! by an [`AuditLoop`] pass. [`SheetService`] wires these together.

pub mod applicator;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod guard;
pub mod revisions;
pub mod service;
pub mod structural;
pub mod validator;

pub use applicator::{ApplyResult, Applicator, ChangedCell};
pub use audit::{AuditLoop, AuditReport, AuditStatus, AuditTarget, Finding, FindingKind};
pub use collaborators::{
    BlankWorkbookSource, CorrectionCallback, CorrectionError, MemorySheetSource,
    MemoryWorkbookCache, SheetSource, WorkbookCache,
};
pub use config::{
    AuditConfig, EngineConfig, GuardConfig, RevisionConfig, SheetMendConfig, ValidatorConfig,
};
pub use error::{IssueKind, Result, SheetMendError, ValidationIssue};
pub use guard::{ConcurrencyGuard, WorkbookLock};
pub use revisions::{
    MemoryRevisionStore, Revision, RevisionManager, RevisionRef, RevisionStore, RevisionSummary,
};
pub use service::{AutomatedEditOutcome, SheetService};
pub use structural::{ShiftOperation, adjust_formula, shift_sheet, sort_range};
pub use validator::{ValidationReport, Validator};

pub use sheetmend_common as common;
pub use sheetmend_engine as engine;
