//! Cell data structures for the worksheet grid.
//!
//! - [`Cell`] - formula text, its compiled script and dependencies, and the
//!   result of the last evaluation
//! - [`Grid`] - thread-safe sparse storage for cells (backed by `DashMap`)

use dashmap::DashMap;
use rhai::Dynamic;
use std::sync::Arc;

use super::cell_ref::CellRef;
use super::format::format_dynamic;
use crate::formula::{DependencyArea, FormulaParser, compile_formula};

/// A cell in the worksheet.
///
/// The compiled expression and dependencies are derived from the formula and
/// only exist while the formula starts with `=`.
#[derive(Clone, Debug, Default)]
pub struct Cell {
    formula: Option<String>,
    compiled: Option<String>,
    dependencies: Vec<CellRef>,
    areas: Vec<DependencyArea>,
    /// `None` until evaluated, or after a failed evaluation.
    pub value: Option<Dynamic>,
    pub formatted_value: String,
    pub error: Option<String>,
}

impl Cell {
    pub fn new() -> Cell {
        Cell::default()
    }

    /// A cell holding `text`, compiled against `sheet`.
    pub fn with_formula(text: &str, parser: &FormulaParser, sheet: Option<&str>) -> Cell {
        let mut cell = Cell::new();
        cell.set_formula(Some(text), parser, sheet);
        cell
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn compiled(&self) -> Option<&str> {
        self.compiled.as_deref()
    }

    pub fn dependencies(&self) -> &[CellRef] {
        &self.dependencies
    }

    /// Ranges, columns, rows and named headers the formula reads.
    pub fn dependency_areas(&self) -> &[DependencyArea] {
        &self.areas
    }

    /// True when the formula is computed (starts with `=`).
    pub fn is_formula(&self) -> bool {
        self.compiled.is_some()
    }

    /// Replace the formula. `=` formulas are compiled; anything else is a
    /// literal and drops the compiled form and dependencies. Unparseable
    /// formulas compile to a script that raises the parse error.
    pub fn set_formula(&mut self, text: Option<&str>, parser: &FormulaParser, sheet: Option<&str>) {
        match text {
            Some(text) if text.starts_with('=') => {
                let compiled = compile_formula(parser, text, sheet);
                self.compiled = Some(compiled.expression);
                self.dependencies = compiled.dependencies;
                self.areas = compiled.areas;
            }
            _ => {
                self.compiled = None;
                self.dependencies.clear();
                self.areas.clear();
            }
        }
        self.formula = text.map(str::to_string);
    }

    pub fn set_value(&mut self, value: Dynamic) {
        self.formatted_value = format_dynamic(&value);
        self.value = Some(value);
        self.error = None;
    }

    /// Record a failure: no value, the error text, nothing to display.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.value = None;
        self.formatted_value.clear();
        self.error = Some(error.into());
    }

    pub fn clear_value(&mut self) {
        self.value = None;
        self.formatted_value.clear();
        self.error = None;
    }

    /// No formula, no value and no error.
    pub fn is_empty(&self) -> bool {
        self.formula.is_none() && self.value.is_none() && self.error.is_none()
    }
}

/// Thread-safe sparse storage for cells.
pub type Grid = Arc<DashMap<CellRef, Cell>>;
