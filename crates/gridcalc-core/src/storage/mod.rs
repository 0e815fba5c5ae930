//! Worksheet persistence in the `.grd` text format.
//!
//! One `CELLREF: FORMULA` line per cell with a formula, sorted row-major.
//! Lines starting with `#` are comments. Formulas are stored verbatim, with
//! backslashes, newlines and carriage returns escaped.

mod parser;
mod writer;

pub use parser::{parse_grd, parse_grd_content};
pub use writer::{write_grd, write_grd_content};
