//! Formula language: tokens, format-preserving parse trees, typed reference
//! views, compilation to Rhai and cut/copy/paste rewriting.

mod compile;
mod lexer;
mod node;
mod parser;
mod reference;
mod rewrite;

pub use compile::{
    CompiledFormula, DependencyArea, compile, compile_formula, compile_in, error_raiser,
};
pub use lexer::{Lexer, Token, TokenKind};
pub use node::{Child, NodeKind, ParseNode};
pub use parser::FormulaParser;
pub use reference::{
    CellRange, CellReference, ColumnReference, DELETED_SENTINEL, INVALID_SENTINEL,
    NakedWorksheetReference, NamedColumnReference, NamedRowReference, Reference, ReferenceNode,
    RowReference, SentinelReference, canonicalise, quote_worksheet_name, unquote_worksheet_name,
};
pub use rewrite::{rewrite, rewrite_formula};
