//! Spreadsheet formula engine: parsing, compilation to Rhai, reference
//! rewriting, dependency tracking and concurrent recalculation.

pub(crate) mod builtins;
pub mod engine;
pub mod error;
pub mod formula;

pub use engine::{
    Bounds, Cell, CellRef, EvaluationContext, RecalcConfig, RecalcOutcome, Worksheet,
    evaluate_formulae, load_constants, recalculate,
};
pub use error::{CycleError, FormulaError};
pub use formula::{FormulaParser, ParseNode, compile, rewrite, rewrite_formula};
