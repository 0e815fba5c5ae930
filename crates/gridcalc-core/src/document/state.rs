use crate::error::Result;
use gridcalc_engine::engine::{CellRef, RecalcConfig, Worksheet};
use std::path::PathBuf;

use super::calc::DEFAULT_USERCODE;
use super::clipboard::Clipboard;

/// Why the last run of the user code failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsercodeError {
    pub message: String,
    /// 1-based line in the user code, when known.
    pub line: Option<usize>,
}

/// A worksheet plus everything needed to edit and calculate it.
pub struct Document {
    /// The cells. Clones share storage, so engine builtins see edits.
    pub worksheet: Worksheet,
    /// Script run by `calculate`; it decides when constants and formulas
    /// are evaluated.
    pub usercode: String,
    /// Current file path
    pub file_path: Option<PathBuf>,
    /// Whether the worksheet has been modified since the last save
    pub modified: bool,
    /// Paths to custom Rhai functions files
    pub functions_files: Vec<PathBuf>,
    /// Functions script content (concatenated from all files)
    pub custom_functions: Option<String>,
    /// Worker count, poll interval and deadline for recalculation
    pub recalc: RecalcConfig,
    pub clipboard: Option<Clipboard>,
    /// Set when the last `calculate` hit an error in the user code
    pub usercode_error: Option<UsercodeError>,
}

impl Document {
    /// Create an empty document.
    ///
    /// This constructor is side-effect free: it does not touch the filesystem.
    pub fn new() -> Self {
        Document {
            worksheet: Worksheet::default(),
            usercode: DEFAULT_USERCODE.to_string(),
            file_path: None,
            modified: false,
            functions_files: Vec::new(),
            custom_functions: None,
            recalc: RecalcConfig::default(),
            clipboard: None,
            usercode_error: None,
        }
    }

    /// Create a document and load a file if provided.
    ///
    /// Functions files that fail to load are skipped and returned as
    /// messages so the caller can report them.
    pub fn with_file(
        path: Option<PathBuf>,
        functions_files: Vec<PathBuf>,
    ) -> Result<(Self, Vec<String>)> {
        let mut doc = Self::new();
        let mut warnings = Vec::new();

        for func_path in &functions_files {
            if let Err(e) = doc.load_functions(func_path) {
                tracing::warn!(path = %func_path.display(), error = %e, "skipping functions file");
                warnings.push(format!("{}: {}", func_path.display(), e));
            }
        }

        if let Some(p) = path {
            if p.exists() {
                doc.load_file(&p)?;
            } else {
                doc.file_path = Some(p);
                doc.modified = false;
            }
        }
        Ok((doc, warnings))
    }

    /// The formatted value of a cell, or `""` when it has none.
    pub fn get_cell_display(&self, cell_ref: &CellRef) -> String {
        self.worksheet
            .get(cell_ref)
            .map(|cell| cell.formatted_value.clone())
            .unwrap_or_default()
    }

    pub fn get_cell_error(&self, cell_ref: &CellRef) -> Option<String> {
        self.worksheet
            .get(cell_ref)
            .and_then(|cell| cell.error.clone())
    }

    pub fn console_text(&self) -> String {
        self.worksheet.console().text()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
