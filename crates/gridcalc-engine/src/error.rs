//! Error types for the formula engine.

use thiserror::Error;

use crate::engine::CellRef;

/// A formula that could not be lexed, parsed or compiled.
///
/// Positions are 1-based character offsets into the formula text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("Error in formula at position {position}: unexpected '{text}'")]
    Lexical { position: usize, text: String },

    #[error("Error in formula at position {position}: unexpected '{text}'")]
    Syntax { position: usize, text: String },

    #[error("Possibly incomplete formula")]
    Incomplete,

    #[error("Error in formula at position {position}: '{word}' is a reserved word")]
    ReservedWord { position: usize, word: String },

    #[error("#Invalid! cell reference in formula")]
    InvalidReference,

    #[error("#Deleted! cell reference in formula")]
    DeletedReference,

    #[error("Unsupported {0} in formula")]
    Unsupported(String),
}

impl FormulaError {
    /// 1-based character offset, when the error points at a token.
    pub fn offset(&self) -> Option<usize> {
        match self {
            FormulaError::Lexical { position, .. }
            | FormulaError::Syntax { position, .. }
            | FormulaError::ReservedWord { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Error class shown on cells and in the console.
    pub fn class_name(&self) -> &'static str {
        "FormulaError"
    }

    /// `FormulaError: <message>`, the text stored on a failing cell.
    pub fn cell_error_text(&self) -> String {
        format!("{}: {}", self.class_name(), self)
    }
}

/// A dependency cycle. The first location is repeated as the last.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", format_path(.path))]
pub struct CycleError {
    pub path: Vec<CellRef>,
}

impl CycleError {
    pub fn new(path: Vec<CellRef>) -> Self {
        CycleError { path }
    }

    pub fn contains(&self, location: &CellRef) -> bool {
        self.path.contains(location)
    }

    pub fn cell_error_text(&self) -> String {
        format!("CycleError: {}", self)
    }
}

fn format_path(path: &[CellRef]) -> String {
    path.iter()
        .map(|loc| loc.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, FormulaError>;
