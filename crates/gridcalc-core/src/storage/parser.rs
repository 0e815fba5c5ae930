//! Parser for .grd file format

use crate::error::{GridcalcError, Result};
use gridcalc_engine::engine::{CellRef, Worksheet};
use std::fs;
use std::path::Path;

/// Parse a .grd file into a worksheet called `sheet_name`.
pub fn parse_grd(path: &Path, sheet_name: &str) -> Result<Worksheet> {
    let content = fs::read_to_string(path)?;
    parse_grd_content(&content, sheet_name)
}

/// Parse .grd content from a string
pub fn parse_grd_content(content: &str, sheet_name: &str) -> Result<Worksheet> {
    let worksheet = Worksheet::new(sheet_name);

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Parse "CELLREF: FORMULA" format
        let Some((cell_ref_str, formula)) = line.split_once(':') else {
            return Err(GridcalcError::Parse {
                line: line_num + 1,
                message: "Expected 'CELLREF: FORMULA' format".to_string(),
            });
        };

        let cell_ref_str = cell_ref_str.trim();
        let cell_ref = CellRef::from_str(cell_ref_str).ok_or_else(|| GridcalcError::Parse {
            line: line_num + 1,
            message: format!("Invalid cell reference: {}", cell_ref_str),
        })?;

        let formula = unescape_grd_text(formula.strip_prefix(' ').unwrap_or(formula));
        worksheet.set_cell_formula(cell_ref, &formula);
    }

    Ok(worksheet)
}

fn unescape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
