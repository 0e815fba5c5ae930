//! Cell coordinates and A1-style names.
//!
//! Coordinates are 1-based `(col, row)` pairs. Columns run from `A` to `ZZZ`
//! (at most three letters), rows from 1 upwards.
//!
//! # Examples
//!
//! ```
//! use gridcalc_engine::engine::CellRef;
//!
//! let cell = CellRef::from_str("B3").unwrap();
//! assert_eq!(cell.col, 2);
//! assert_eq!(cell.row, 3);
//! assert_eq!(cell.to_string(), "B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Highest addressable column (`ZZZ`).
pub const MAX_COL: usize = 26 * 26 * 26 + 26 * 26 + 26;

/// Highest addressable row. Rows travel into Rhai as `INT`.
pub const MAX_ROW: usize = i64::MAX as usize;

/// A reference to a cell by 1-based column and row.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellRef {
    pub col: usize,
    pub row: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { col, row }
    }

    /// Parse a cell name such as `A1`, `$B$2` or `aa10`.
    /// `$` markers are accepted and ignored. Returns None for off-grid names.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<CellRef> {
        cell_name_to_coordinates(name)
    }

    /// Shift by a signed offset. Returns None if the result leaves the grid.
    pub fn offset(&self, dx: i64, dy: i64) -> Option<CellRef> {
        let col = offset_index(self.col, dx)?;
        let row = offset_index(self.row, dy)?;
        if col > MAX_COL || row > MAX_ROW {
            return None;
        }
        Some(CellRef::new(col, row))
    }

    pub fn col_to_letters(col: usize) -> String {
        column_index_to_name(col).unwrap_or_default()
    }
}

fn offset_index(index: usize, delta: i64) -> Option<usize> {
    let shifted = (index as i128) + (delta as i128);
    if shifted < 1 || shifted > usize::MAX as i128 {
        return None;
    }
    Some(shifted as usize)
}

impl std::str::FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        cell_name_to_coordinates(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row)
    }
}

/// An inclusive rectangle of cells.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: usize,
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
}

impl Bounds {
    pub fn new(left: usize, top: usize, right: usize, bottom: usize) -> Bounds {
        Bounds {
            left,
            top,
            right,
            bottom,
        }
    }

    /// The rectangle spanned by two corners, in any order.
    pub fn from_corners(a: CellRef, b: CellRef) -> Bounds {
        Bounds::new(
            a.col.min(b.col),
            a.row.min(b.row),
            a.col.max(b.col),
            a.row.max(b.row),
        )
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        self.left <= cell.col
            && cell.col <= self.right
            && self.top <= cell.row
            && cell.row <= self.bottom
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn cell_count(&self) -> usize {
        self.width().saturating_mul(self.height())
    }

    pub fn top_left(&self) -> CellRef {
        CellRef::new(self.left, self.top)
    }

    /// Every location in row-major order.
    pub fn locations(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.top..=self.bottom)
            .flat_map(move |row| (self.left..=self.right).map(move |col| CellRef::new(col, row)))
    }
}

fn column_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]+$").expect("valid column regex"))
}

fn cell_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$?(?<letters>[A-Za-z]+)\$?(?<numbers>[1-9][0-9]*)$")
            .expect("valid cell name regex")
    })
}

/// `A` -> 1, `Z` -> 26, `AA` -> 27. None for non-letters or past `ZZZ`.
pub fn column_name_to_index(name: &str) -> Option<usize> {
    if !column_name_re().is_match(name) || name.len() > 3 {
        return None;
    }
    let index = name
        .to_ascii_uppercase()
        .bytes()
        .fold(0usize, |acc, c| acc * 26 + (c - b'A') as usize + 1);
    (index <= MAX_COL).then_some(index)
}

/// 1 -> `A`, 27 -> `AA`. None outside `1..=MAX_COL`.
pub fn column_index_to_name(index: usize) -> Option<String> {
    if index == 0 || index > MAX_COL {
        return None;
    }
    let mut result = String::new();
    let mut n = index;
    while n > 0 {
        n -= 1;
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    Some(result)
}

/// Render a coordinate as a cell name with optional `$` markers.
pub fn coordinates_to_cell_name(
    col: usize,
    row: usize,
    col_absolute: bool,
    row_absolute: bool,
) -> Option<String> {
    if row == 0 || row > MAX_ROW {
        return None;
    }
    let letters = column_index_to_name(col)?;
    let col_marker = if col_absolute { "$" } else { "" };
    let row_marker = if row_absolute { "$" } else { "" };
    Some(format!("{col_marker}{letters}{row_marker}{row}"))
}

pub fn cell_name_to_coordinates(name: &str) -> Option<CellRef> {
    let caps = cell_name_re().captures(name)?;
    let col = column_name_to_index(&caps["letters"])?;
    let row = caps["numbers"].parse::<usize>().ok()?;
    if row > MAX_ROW {
        return None;
    }
    Some(CellRef::new(col, row))
}
