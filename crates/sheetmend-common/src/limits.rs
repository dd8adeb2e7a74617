//! Fixed sheet limits (Excel 2007+ grid).

/// Number of addressable rows; valid zero-based rows are `0..MAX_ROWS`.
pub const MAX_ROWS: u32 = 1_048_576;

/// Number of addressable columns; valid zero-based columns are `0..MAX_COLS`.
pub const MAX_COLS: u32 = 16_384;

/// Maximum sheet name length in characters.
pub const MAX_SHEET_NAME_LEN: usize = 31;

#[inline]
pub fn row_in_bounds(row: u32) -> bool {
    row < MAX_ROWS
}

#[inline]
pub fn col_in_bounds(col: u32) -> bool {
    col < MAX_COLS
}
