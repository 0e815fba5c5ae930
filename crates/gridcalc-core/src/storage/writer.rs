//! Writer for .grd file format

use crate::error::Result;
use gridcalc_engine::engine::Worksheet;
use std::fs;
use std::path::Path;

/// Write a worksheet to a .grd file
pub fn write_grd(path: &Path, worksheet: &Worksheet) -> Result<()> {
    let content = write_grd_content(worksheet);
    fs::write(path, content)?;
    Ok(())
}

/// Write a worksheet to a .grd format string
pub fn write_grd_content(worksheet: &Worksheet) -> String {
    let mut lines = vec!["# gridcalc worksheet".to_string()];

    for cell_ref in worksheet.locations() {
        // Cells without a formula hold nothing worth keeping
        let Some(formula) = worksheet.cell_formula(&cell_ref) else {
            continue;
        };
        lines.push(format!("{}: {}", cell_ref, escape_grd_text(&formula)));
    }

    lines.join("\n") + "\n"
}

fn escape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse_grd_content;
    use gridcalc_engine::engine::CellRef;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_write_literal_and_formula() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(1, 1), "42");
        ws.set_cell_formula(CellRef::new(2, 1), "=B1 + C1");
        let content = write_grd_content(&ws);
        assert_eq!(content, "# gridcalc worksheet\nA1: 42\nB1: =B1 + C1\n");
    }

    #[test]
    fn test_skip_cells_without_formula() {
        let ws = Worksheet::new("Sheet1");
        ws.cell(CellRef::new(1, 1));
        ws.set_cell_formula(CellRef::new(1, 2), "x");
        let content = write_grd_content(&ws);
        assert!(!content.contains("A1:"));
        assert!(content.contains("A2: x"));
    }

    #[test]
    fn test_sorted_output() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(2, 2), "3"); // B2
        ws.set_cell_formula(CellRef::new(1, 1), "1"); // A1
        ws.set_cell_formula(CellRef::new(2, 1), "2"); // B1
        let content = write_grd_content(&ws);
        let lines: Vec<_> = content.lines().collect();
        assert!(lines[1].starts_with("A1"));
        assert!(lines[2].starts_with("B1"));
        assert!(lines[3].starts_with("B2"));
    }

    #[test]
    fn test_awkward_formulas_survive_a_round_trip() {
        let ws = Worksheet::new("Sheet1");
        let awkward = [" lead", "a\\nb", "two\nlines", "=\"x: y\" & A1:A2"];
        for (row, text) in awkward.iter().enumerate() {
            ws.set_cell_formula(CellRef::new(1, row + 1), text);
        }
        let back = parse_grd_content(&write_grd_content(&ws), "Sheet1").unwrap();
        for (row, text) in awkward.iter().enumerate() {
            assert_eq!(back.cell_formula(&CellRef::new(1, row + 1)).as_deref(), Some(*text));
        }
    }
}
