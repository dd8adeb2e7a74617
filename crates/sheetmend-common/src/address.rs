//! A1-style cell and range addressing.
//!
//! Rows and columns are **0-indexed** everywhere in the model:
//! - `row = 0` is spreadsheet row `1`
//! - `col = 0` is column `A`
//!
//! Addresses serialize as their A1 text so a sheet's cell map reads as
//! `{"A1": {...}, "B7": {...}}` on the wire.

use crate::limits::{MAX_COLS, MAX_ROWS};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty cell reference")]
    Empty,
    #[error("cell reference `{0}` is missing a column")]
    MissingColumn(String),
    #[error("cell reference `{0}` is missing a row")]
    MissingRow(String),
    #[error("cell reference `{0}` has trailing characters")]
    TrailingCharacters(String),
    #[error("cell reference `{0}` is outside the sheet limits")]
    OutOfBounds(String),
}

/// Convert a zero-based column index to letters (`0 -> A`, `27 -> AB`).
pub fn col_to_letters(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Convert column letters to a zero-based index. Case-insensitive.
pub fn letters_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut acc: u32 = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        acc = acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1);
    }
    Some(acc - 1)
}

/// A single cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    pub row: u32,
    pub col: u32,
}

impl CellAddr {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse `A1`, `$B$2`, `c10`.
    pub fn from_a1(a1: &str) -> Result<Self, AddressError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let bytes = s.as_bytes();
        let mut idx = 0usize;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(AddressError::MissingColumn(s.to_string()));
        }
        let col_str = &s[col_start..idx];
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(AddressError::MissingRow(s.to_string()));
        }
        if idx != bytes.len() {
            return Err(AddressError::TrailingCharacters(s.to_string()));
        }
        let col = letters_to_col(col_str).ok_or_else(|| AddressError::OutOfBounds(s.to_string()))?;
        let row_1: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| AddressError::OutOfBounds(s.to_string()))?;
        if row_1 == 0 || row_1 > MAX_ROWS || col >= MAX_COLS {
            return Err(AddressError::OutOfBounds(s.to_string()));
        }
        Ok(Self::new(row_1 - 1, col))
    }

    pub fn to_a1(self) -> String {
        format!("{}{}", col_to_letters(self.col), self.row + 1)
    }

    pub fn in_bounds(self) -> bool {
        self.row < MAX_ROWS && self.col < MAX_COLS
    }

    /// Offset by a row/column delta, `None` when the result leaves the grid.
    pub fn offset(self, drow: u32, dcol: u32) -> Option<Self> {
        let row = self.row.checked_add(drow)?;
        let col = self.col.checked_add(dcol)?;
        let out = Self::new(row, col);
        out.in_bounds().then_some(out)
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

impl Serialize for CellAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_a1())
    }
}

struct A1Visitor;

impl Visitor<'_> for A1Visitor {
    type Value = CellAddr;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an A1-style cell reference")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CellAddr, E> {
        CellAddr::from_a1(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for CellAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(A1Visitor)
    }
}

/// Inclusive rectangular range, always normalized so `start <= end` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeAddr {
    pub start: CellAddr,
    pub end: CellAddr,
}

impl RangeAddr {
    pub fn new(a: CellAddr, b: CellAddr) -> Self {
        Self {
            start: CellAddr::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddr::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn cell(addr: CellAddr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Range anchored at `start` spanning `height` rows and `width` columns.
    /// Returns `None` for an empty shape.
    pub fn from_shape(start: CellAddr, height: u32, width: u32) -> Option<Self> {
        if height == 0 || width == 0 {
            return None;
        }
        let end = CellAddr::new(
            start.row.saturating_add(height - 1),
            start.col.saturating_add(width - 1),
        );
        Some(Self { start, end })
    }

    /// Parse `A1:B2` or a single `A1`.
    pub fn from_a1(text: &str) -> Result<Self, AddressError> {
        match text.split_once(':') {
            Some((a, b)) => Ok(Self::new(CellAddr::from_a1(a)?, CellAddr::from_a1(b)?)),
            None => CellAddr::from_a1(text).map(Self::cell),
        }
    }

    pub fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    pub fn contains(&self, addr: CellAddr) -> bool {
        addr.row >= self.start.row
            && addr.row <= self.end.row
            && addr.col >= self.start.col
            && addr.col <= self.end.col
    }

    pub fn intersects(&self, other: &RangeAddr) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    pub fn in_bounds(&self) -> bool {
        self.start.in_bounds() && self.end.in_bounds()
    }

    /// Row-major iteration over every address in the range.
    pub fn cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.col..=self.end.col).map(move |col| CellAddr::new(row, col))
        })
    }
}

impl fmt::Display for RangeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for RangeAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

impl Serialize for RangeAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct RangeVisitor;

impl Visitor<'_> for RangeVisitor {
    type Value = RangeAddr;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an A1-style range such as `A1:B2`")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RangeAddr, E> {
        RangeAddr::from_a1(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for RangeAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(RangeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_round_trip_at_boundaries() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(MAX_COLS - 1), "XFD");
        assert_eq!(letters_to_col("xfd"), Some(MAX_COLS - 1));
        assert_eq!(letters_to_col("A1"), None);
    }

    #[test]
    fn parses_absolute_markers_and_rejects_garbage() {
        assert_eq!(CellAddr::from_a1("$B$2").unwrap(), CellAddr::new(1, 1));
        assert_eq!(
            CellAddr::from_a1("A0"),
            Err(AddressError::OutOfBounds("A0".into()))
        );
        assert!(matches!(
            CellAddr::from_a1("12"),
            Err(AddressError::MissingColumn(_))
        ));
        assert!(matches!(
            CellAddr::from_a1("A1B"),
            Err(AddressError::TrailingCharacters(_))
        ));
        assert!(CellAddr::from_a1("A1048577").is_err());
    }

    #[test]
    fn ranges_normalize_reversed_corners() {
        let r = RangeAddr::from_a1("C3:A1").unwrap();
        assert_eq!(r.start, CellAddr::new(0, 0));
        assert_eq!(r.end, CellAddr::new(2, 2));
        assert_eq!(r.to_string(), "A1:C3");
        assert_eq!(r.cells().count(), 9);
    }

    #[test]
    fn addresses_serialize_as_a1_map_keys() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(CellAddr::new(0, 1), 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"B1":1}"#);
        let back: std::collections::BTreeMap<CellAddr, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
