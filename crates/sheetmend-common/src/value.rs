use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Error tokens the formula engine writes into computed values.
pub const ERROR_TOKENS: &[&str] = &[
    "#NULL!",
    "#REF!",
    "#NAME?",
    "#VALUE!",
    "#DIV/0!",
    "#N/A",
    "#NUM!",
    "#ERROR!",
    "#N/IMPL!",
    "#SPILL!",
    "#CALC!",
    "#CIRC!",
    "#CANCELLED!",
];

/// Returns the canonical token when `text` is a formula error token.
pub fn error_token(text: &str) -> Option<&'static str> {
    let trimmed = text.trim();
    ERROR_TOKENS
        .iter()
        .copied()
        .find(|tok| tok.eq_ignore_ascii_case(trimmed))
}

/// Raw or computed cell content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The engine error token carried by this value, if any.
    pub fn error_token(&self) -> Option<&'static str> {
        self.as_text().and_then(error_token)
    }

    /// Text beginning with `=` is formula input rather than a literal.
    pub fn formula_text(&self) -> Option<&str> {
        self.as_text().filter(|s| s.starts_with('='))
    }

    /// Ordering used by range sorts: numbers compare numerically when both
    /// sides are numbers, everything else by case-folded display text.
    /// Nulls sort last regardless of direction handling upstream.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => Ordering::Equal,
            (CellValue::Null, _) => Ordering::Greater,
            (_, CellValue::Null) => Ordering::Less,
            (CellValue::Number(a), CellValue::Number(b)) => a.total_cmp(b),
            (a, b) => {
                let (la, lb) = (a.to_string().to_lowercase(), b.to_string().to_lowercase());
                la.cmp(&lb).then_with(|| a.to_string().cmp(&b.to_string()))
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}
