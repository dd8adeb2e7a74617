use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a validator finding. The same type is used for errors and
/// warnings; which list a finding lands in decides its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BatchTooLarge,
    LargeBatch,
    UnknownSheet,
    OutOfBounds,
    InvalidRange,
    RangeCorrected,
    LargeRange,
    RangeTooLarge,
    InvalidFormula,
    UnsupportedFunction,
    VolatileFunction,
    LastSheet,
    DependentFormulas,
    NameCollision,
    InvalidName,
}

/// One structured validator finding. `action_index` is `None` for
/// batch-wide findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub action_index: Option<usize>,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn batch(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            action_index: None,
            kind,
            message: message.into(),
        }
    }

    pub fn at(index: usize, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            action_index: Some(index),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action_index {
            Some(index) => write!(f, "action {index}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SheetMendError {
    #[error("batch rejected: {}", summarize(.errors))]
    Validation { errors: Vec<ValidationIssue> },
    #[error("revision conflict: batch targets `{requested}` but latest is `{current}`")]
    RevisionConflict { current: String, requested: String },
    #[error("not found: {what}")]
    NotFound { what: String },
}

impl SheetMendError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SheetMendError::NotFound { what: what.into() }
    }
}

pub type Result<T, E = SheetMendError> = std::result::Result<T, E>;
