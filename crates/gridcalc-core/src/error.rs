//! Error types for gridcalc core.

use std::time::Duration;

use rhai::EvalAltResult;
use thiserror::Error;

/// Errors raised by document operations and storage.
#[derive(Error, Debug)]
pub enum GridcalcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Rhai error: {0}")]
    Rhai(
        #[from]
        #[source]
        Box<EvalAltResult>,
    ),

    #[error("Rhai compile error: {0}")]
    RhaiCompile(String),

    #[error("Nothing to paste")]
    NothingToPaste,

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("No functions file loaded")]
    NoFunctionsLoaded,

    #[error("Recalculation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, GridcalcError>;
