use super::Document;
use crate::error::{GridcalcError, Result};
use crate::storage::{parse_grd, write_grd};
use gridcalc_engine::engine::{EvaluationContext, Worksheet};
use std::path::{Path, PathBuf};

const MAX_FUNCTION_FILE_BYTES: u64 = 1_048_576; // 1 MiB

fn read_functions_file(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_FUNCTION_FILE_BYTES {
        return Err(GridcalcError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Refusing to read {}: functions file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_FUNCTION_FILE_BYTES
            ),
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Compile `script` against a scratch worksheet so a broken file never
/// reaches the document.
fn check_functions(script: &str) -> Result<()> {
    let (_, error) = EvaluationContext::with_functions(&Worksheet::default(), Some(script));
    match error {
        Some(message) => Err(GridcalcError::RhaiCompile(message)),
        None => Ok(()),
    }
}

impl Document {
    /// Load custom Rhai functions from a file (appends to existing functions).
    /// Returns the path loaded, or an error.
    pub fn load_functions(&mut self, path: &Path) -> Result<PathBuf> {
        let path_buf = std::fs::canonicalize(path)?;
        let content = read_functions_file(&path_buf)?;

        if self.functions_files.contains(&path_buf) {
            return Ok(path_buf);
        }

        let merged = match &self.custom_functions {
            Some(existing) => format!("{}\n\n{}", existing, content),
            None => content,
        };
        check_functions(&merged)?;

        self.functions_files.push(path_buf.clone());
        self.custom_functions = Some(merged);
        tracing::info!(path = %path_buf.display(), "loaded functions");
        Ok(path_buf)
    }

    /// Reload all custom functions from the loaded files.
    /// Returns the number of files reloaded.
    pub fn reload_functions(&mut self) -> Result<usize> {
        if self.functions_files.is_empty() {
            return Err(GridcalcError::NoFunctionsLoaded);
        }

        let mut merged = String::new();
        for (idx, path) in self.functions_files.iter().enumerate() {
            let content = read_functions_file(path)?;
            if idx > 0 {
                merged.push_str("\n\n");
            }
            merged.push_str(&content);
        }
        check_functions(&merged)?;

        self.custom_functions = Some(merged);
        Ok(self.functions_files.len())
    }

    /// Save to the current file path, or to `path` when given.
    /// Returns the path saved to.
    pub fn save_file(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.file_path.clone().ok_or_else(|| {
                GridcalcError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no file path set",
                ))
            })?,
        };
        write_grd(&path, &self.worksheet)?;
        self.file_path = Some(path.clone());
        self.modified = false;
        Ok(path)
    }

    /// Replace the worksheet with the contents of a `.grd` file.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let worksheet = parse_grd(path, self.worksheet.name())?;
        tracing::info!(path = %path.display(), cells = worksheet.len(), "loaded worksheet");
        self.worksheet = worksheet;
        self.clipboard = None;
        self.usercode_error = None;
        self.file_path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_engine::engine::CellRef;
    use std::io::Write;

    fn temp_path(tag: &str, ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gridcalc_{}_{}_{}_{:?}.{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
            std::thread::current().id(),
            ext
        ))
    }

    struct Cleanup(Vec<PathBuf>);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            for path in &self.0 {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    fn write_file(path: &Path, text: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "{}", text).unwrap();
    }

    #[test]
    fn test_load_functions_failure_is_transactional() {
        let good_path = temp_path("good_funcs", "rhai");
        let bad_path = temp_path("bad_funcs", "rhai");
        let _cleanup = Cleanup(vec![good_path.clone(), bad_path.clone()]);
        write_file(&good_path, "fn double(x) { x * 2 }");
        write_file(&bad_path, "fn broken(x) { x + }");

        let mut doc = Document::new();
        doc.load_functions(&good_path).unwrap();
        let files_before = doc.functions_files.clone();
        let custom_before = doc.custom_functions.clone();

        let err = doc.load_functions(&bad_path);
        assert!(matches!(err, Err(GridcalcError::RhaiCompile(_))));
        assert_eq!(doc.functions_files, files_before);
        assert_eq!(doc.custom_functions, custom_before);

        doc.set_cell_from_input(CellRef::new(1, 1), "=double(3)");
        doc.calculate().unwrap();
        assert_eq!(doc.get_cell_display(&CellRef::new(1, 1)), "6");
    }

    #[test]
    fn test_load_functions_same_path_is_idempotent() {
        let path = temp_path("same_funcs", "rhai");
        let _cleanup = Cleanup(vec![path.clone()]);
        write_file(&path, "fn double(x) { x * 2 }");

        let mut doc = Document::new();
        doc.load_functions(&path).unwrap();
        let custom_before = doc.custom_functions.clone();
        doc.load_functions(&path).unwrap();
        assert_eq!(doc.functions_files.len(), 1);
        assert_eq!(doc.custom_functions, custom_before);
    }

    #[test]
    fn test_load_functions_rejects_oversized_file() {
        let path = temp_path("huge_funcs", "rhai");
        let _cleanup = Cleanup(vec![path.clone()]);
        let body = "// padding\n".repeat((MAX_FUNCTION_FILE_BYTES as usize / 11) + 10);
        std::fs::write(&path, body).unwrap();

        let mut doc = Document::new();
        let err = doc.load_functions(&path);
        assert!(matches!(err, Err(GridcalcError::Io(_))));
        assert!(doc.functions_files.is_empty());
    }

    #[test]
    fn test_reload_functions_picks_up_edits() {
        let path = temp_path("reload_funcs", "rhai");
        let _cleanup = Cleanup(vec![path.clone()]);
        write_file(&path, "fn scale(x) { x * 2 }");

        let mut doc = Document::new();
        assert!(matches!(doc.reload_functions(), Err(GridcalcError::NoFunctionsLoaded)));
        doc.load_functions(&path).unwrap();
        write_file(&path, "fn scale(x) { x * 3 }");
        assert_eq!(doc.reload_functions().unwrap(), 1);

        doc.set_cell_from_input(CellRef::new(1, 1), "=scale(5)");
        doc.calculate().unwrap();
        assert_eq!(doc.get_cell_display(&CellRef::new(1, 1)), "15");
    }

    #[test]
    fn test_with_file_reports_function_load_errors() {
        let bad_path = temp_path("init_bad_funcs", "rhai");
        let _cleanup = Cleanup(vec![bad_path.clone()]);
        write_file(&bad_path, "fn broken(x) { x + }");

        let (doc, warnings) = Document::with_file(None, vec![bad_path]).unwrap();
        assert!(doc.functions_files.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("sheet", "grd");
        let _cleanup = Cleanup(vec![path.clone()]);

        let mut doc = Document::new();
        doc.set_cell_from_input(CellRef::new(1, 1), "10");
        doc.set_cell_from_input(CellRef::new(2, 1), "=A1 * 2");
        doc.set_cell_from_input(CellRef::new(1, 2), "Total: 3");
        doc.save_file(Some(&path)).unwrap();
        assert!(!doc.modified);

        let (mut loaded, _) = Document::with_file(Some(path.clone()), Vec::new()).unwrap();
        assert_eq!(loaded.file_path.as_deref(), Some(path.as_path()));
        assert_eq!(
            loaded.worksheet.cell_formula(&CellRef::new(1, 2)).as_deref(),
            Some("Total: 3")
        );
        loaded.calculate().unwrap();
        assert_eq!(loaded.get_cell_display(&CellRef::new(2, 1)), "20");
    }

    #[test]
    fn test_save_without_path_fails() {
        let mut doc = Document::new();
        assert!(matches!(doc.save_file(None), Err(GridcalcError::Io(_))));
    }
}
