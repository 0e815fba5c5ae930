//! Document state and logic.

mod calc;
mod clipboard;
mod io;
mod ops;
mod state;

pub use calc::DEFAULT_USERCODE;
pub use clipboard::Clipboard;
pub use state::{Document, UsercodeError};
