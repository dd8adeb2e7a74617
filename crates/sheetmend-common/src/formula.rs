//! Formula text inspection and token-preserving rewrites.
//!
//! Everything here works on the formula tokenizer's output rather than on
//! regular expressions, so string literals and quoted sheet names are never
//! mistaken for references.

use formualizer_parse::{Token, TokenSubType, TokenType, Tokenizer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to tokenize formula: {0}")]
pub struct FormulaError(pub String);

/// Prefix `=` when missing.
pub fn with_leading_eq(formula: &str) -> String {
    let trimmed = formula.trim();
    if trimmed.starts_with('=') {
        trimmed.to_string()
    } else {
        format!("={trimmed}")
    }
}

fn tokenize(formula: &str) -> Result<(String, Vec<Token>), FormulaError> {
    let text = with_leading_eq(formula);
    let tokenizer = Tokenizer::new(&text).map_err(|e| FormulaError(e.message))?;
    Ok((text, tokenizer.items))
}

/// Upper-cased function names in order of first appearance.
pub fn function_names(formula: &str) -> Result<Vec<String>, FormulaError> {
    let (_, tokens) = tokenize(formula)?;
    let mut out: Vec<String> = Vec::new();
    for token in tokens {
        if token.token_type != TokenType::Func || token.subtype != TokenSubType::Open {
            continue;
        }
        let name = token.value.trim_end_matches('(').trim().to_ascii_uppercase();
        let name = name.strip_prefix("_XLFN.").unwrap_or(&name).to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

/// A range-like operand, split into its optional sheet qualifier and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceToken<'a> {
    /// Unquoted sheet name, when qualified.
    pub sheet: Option<String>,
    /// Whether the qualifier was written in `'...'` form.
    pub quoted: bool,
    /// Reference text after the `!` (or the whole token when unqualified).
    pub target: &'a str,
    /// The token exactly as written.
    pub text: &'a str,
}

impl<'a> ReferenceToken<'a> {
    pub fn parse(text: &'a str) -> Self {
        match text.rfind('!') {
            Some(idx) => {
                let prefix = &text[..idx];
                let target = &text[idx + 1..];
                let (sheet, quoted) = if prefix.len() >= 2
                    && prefix.starts_with('\'')
                    && prefix.ends_with('\'')
                {
                    (prefix[1..prefix.len() - 1].replace("''", "'"), true)
                } else {
                    (prefix.to_string(), false)
                };
                Self {
                    sheet: Some(sheet),
                    quoted,
                    target,
                    text,
                }
            }
            None => Self {
                sheet: None,
                quoted: false,
                target: text,
                text,
            },
        }
    }
}

/// Sheet names referenced by qualified operands, unquoted, deduplicated.
pub fn referenced_sheets(formula: &str) -> Result<Vec<String>, FormulaError> {
    let (text, tokens) = tokenize(formula)?;
    let mut out: Vec<String> = Vec::new();
    for token in &tokens {
        if !is_range_operand(token) {
            continue;
        }
        let reference = ReferenceToken::parse(&text[token.start..token.end]);
        if let Some(sheet) = reference.sheet
            && !out.contains(&sheet)
        {
            out.push(sheet);
        }
    }
    Ok(out)
}

/// Range-subtype operands that are not sheet-qualified: cell references,
/// defined names, or bare words the author meant as text.
pub fn bare_operands(formula: &str) -> Result<Vec<String>, FormulaError> {
    let (text, tokens) = tokenize(formula)?;
    Ok(tokens
        .iter()
        .filter(|t| is_range_operand(t))
        .map(|t| &text[t.start..t.end])
        .filter(|s| !s.contains('!'))
        .map(str::to_string)
        .collect())
}

#[inline]
fn is_range_operand(token: &Token) -> bool {
    token.token_type == TokenType::Operand && token.subtype == TokenSubType::Range
}

/// Rewrite range operands in place, preserving everything between them.
///
/// `rewrite` returns the replacement text for a reference, or `None` to keep
/// it as written. Returns the formula with its leading `=`.
pub fn rewrite_references<F>(formula: &str, mut rewrite: F) -> Result<String, FormulaError>
where
    F: FnMut(&ReferenceToken<'_>) -> Option<String>,
{
    let (text, tokens) = tokenize(formula)?;
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for token in &tokens {
        if token.start > cursor {
            out.push_str(&text[cursor..token.start]);
        }
        let written = &text[token.start..token.end];
        if is_range_operand(token)
            && let Some(replacement) = rewrite(&ReferenceToken::parse(written))
        {
            out.push_str(&replacement);
        } else {
            out.push_str(written);
        }
        cursor = token.end;
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }
    Ok(out)
}

/// Render a sheet name the way it must appear before `!` in a formula.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && !looks_like_cell_ref(name);
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn looks_like_cell_ref(name: &str) -> bool {
    let letters = name.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    letters > 0
        && letters <= 3
        && letters < name.len()
        && name[letters..].chars().all(|c| c.is_ascii_digit())
}
