//! gridcalc-core - document model, clipboard, calculation and storage.

pub mod document;
pub mod error;
pub mod storage;

pub use document::{Clipboard, Document, UsercodeError};
pub use error::{GridcalcError, Result};

pub use gridcalc_engine::engine::{Bounds, CellRef};
