use crate::limits::MAX_SHEET_NAME_LEN;
use unicode_normalization::UnicodeNormalization as _;

const FORBIDDEN: &[char] = &['\\', '/', '?', '*', '[', ']', ':'];
const FALLBACK_NAME: &str = "Sheet";

/// Sheet names compare case-insensitively across Unicode.
///
/// Both inputs are NFKC-normalized and then uppercased.
pub fn sheet_names_eq(a: &str, b: &str) -> bool {
    a.nfkc()
        .flat_map(|c| c.to_uppercase())
        .eq(b.nfkc().flat_map(|c| c.to_uppercase()))
}

/// Strip forbidden characters, trim surrounding whitespace and apostrophes,
/// and truncate to the name limit. Empty input becomes `Sheet`.
pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let trimmed = cleaned.trim().trim_matches('\'').trim();
    let truncated: String = trimmed.chars().take(MAX_SHEET_NAME_LEN).collect();
    let truncated = truncated.trim_end().to_string();
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated
    }
}

/// Sanitize `raw` and suffix ` (n)` until it no longer collides with `existing`.
pub fn unique_sheet_name<'a, I>(raw: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let existing: Vec<&str> = existing.into_iter().collect();
    let base = sanitize_sheet_name(raw);
    let taken = |candidate: &str| existing.iter().any(|e| sheet_names_eq(e, candidate));
    if !taken(&base) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let suffix = format!(" ({n})");
        let room = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
        let stem: String = base.chars().take(room).collect();
        let candidate = format!("{}{suffix}", stem.trim_end());
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
