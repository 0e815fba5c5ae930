//! Reference rewriting for cut, copy and paste.
//!
//! A copy shifts the relative axes of cell and range references. A cut
//! moves only what it contains: references into the cut rectangle shift on
//! both axes, `$` markers notwithstanding, and everything else stays put.
//! Column, row, named and worksheet references never move.

use super::node::ParseNode;
use super::parser::FormulaParser;
use super::reference::Reference;
use crate::engine::Bounds;

/// Offset the references in `tree` by `(dx, dy)`.
///
/// `source` is the rectangle that was cut or copied. Ranges move on a cut
/// only when both corners lie inside it.
pub fn rewrite(tree: &ParseNode, dx: i64, dy: i64, is_cut: bool, source: Bounds) -> ParseNode {
    tree.replace(&mut |node| {
        let reference = node.as_reference()?;
        Some(match reference {
            Reference::Cell(cell) => {
                let inside = cell.coords().is_some_and(|c| source.contains(&c));
                if is_cut && !inside {
                    node.clone()
                } else {
                    cell.offset(dx, dy, is_cut)
                }
            }
            Reference::Range(range) => {
                let inside = range
                    .corners()
                    .is_some_and(|(a, b)| source.contains(&a) && source.contains(&b));
                if is_cut && !inside {
                    node.clone()
                } else {
                    range.offset(dx, dy, is_cut)
                }
            }
            _ => node.clone(),
        })
    })
}

/// Rewrite formula text. Literals and unparseable formulas come back as-is.
pub fn rewrite_formula(
    parser: &FormulaParser,
    text: &str,
    dx: i64,
    dy: i64,
    is_cut: bool,
    source: Bounds,
) -> String {
    if !text.starts_with('=') {
        return text.to_string();
    }
    match parser.parse(text) {
        Ok(tree) => rewrite(&tree, dx, dy, is_cut, source).flatten(),
        Err(err) => {
            tracing::debug!(formula = text, error = %err, "leaving unparseable formula unchanged");
            text.to_string()
        }
    }
}
