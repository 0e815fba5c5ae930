//! Spreadsheet engine API.
//!
//! This module provides the worksheet model and the recalculation engine:
//!
//! - [`Cell`], [`Grid`], [`Worksheet`] - Data structures for cell storage
//! - [`CellRef`], [`Bounds`] - Cell coordinates (A1 notation ↔ col/row)
//! - [`SheetRange`] - The value a range reference evaluates to
//! - [`build_dependency_graph`] - Dependency graph with cycle detection
//! - [`EvaluationContext`] - Rhai engine with built-in functions
//! - [`recalculate`] - Load constants and evaluate formulas concurrently
//! - [`format_dynamic`] - Format values for display

mod cell;
mod cell_ref;
pub(crate) mod eval;
mod format;
mod graph;
pub(crate) mod range;
mod recalc;
mod worksheet;

pub use cell::{Cell, Grid};
pub use cell_ref::{
    Bounds, CellRef, MAX_COL, MAX_ROW, cell_name_to_coordinates, column_index_to_name,
    column_name_to_index, coordinates_to_cell_name,
};
pub use eval::{EvaluationContext, WorksheetProvider, create_engine};
pub use format::{format_dynamic, format_number};
pub use graph::{DependencyGraph, GraphNode, build_dependency_graph};
pub use range::SheetRange;
pub use recalc::{
    RecalcConfig, RecalcOutcome, error_text, eval_constant, evaluate_formulae,
    evaluate_formulae_with, load_constants, recalculate, recalculate_with,
};
pub use worksheet::{Console, Worksheet};

pub use rhai::{AST, Dynamic};
