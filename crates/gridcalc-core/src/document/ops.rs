use super::{Clipboard, Document};
use crate::error::{GridcalcError, Result};
use gridcalc_engine::engine::{Bounds, CellRef};

impl Document {
    /// Set cell contents from input text. A leading `=` makes a computed
    /// formula; empty input clears the cell.
    pub fn set_cell_from_input(&mut self, cell_ref: CellRef, input: &str) {
        self.worksheet.set_cell_formula(cell_ref, input);
        self.modified = true;
    }

    /// Clear the specified cell
    pub fn clear_cell(&mut self, cell_ref: &CellRef) {
        if self.worksheet.remove(cell_ref).is_some() {
            self.modified = true;
        }
    }

    /// Copy the rectangle spanned by `start` and `end` to the clipboard.
    pub fn copy(&mut self, start: CellRef, end: CellRef) -> Result<()> {
        self.clipboard = Some(Clipboard::copy(&self.worksheet, start, end)?);
        Ok(())
    }

    /// Move the rectangle spanned by `start` and `end` to the clipboard.
    pub fn cut(&mut self, start: CellRef, end: CellRef) -> Result<()> {
        self.clipboard = Some(Clipboard::cut(&self.worksheet, start, end)?);
        self.modified = true;
        Ok(())
    }

    /// Paste the clipboard into `start..=end`. Returns the rectangle written.
    pub fn paste_to(&mut self, start: CellRef, end: CellRef) -> Result<Bounds> {
        let clipboard = self.clipboard.as_mut().ok_or(GridcalcError::NothingToPaste)?;
        let written = clipboard.paste_to(&self.worksheet, start, end)?;
        self.modified = true;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn loc(name: &str) -> CellRef {
        CellRef::from_str(name).unwrap()
    }

    #[test]
    fn test_set_and_clear_cell_mark_modified() {
        let mut doc = Document::new();
        doc.set_cell_from_input(loc("A1"), "=1 + 1");
        assert!(doc.modified);
        assert_eq!(doc.worksheet.cell_formula(&loc("A1")).as_deref(), Some("=1 + 1"));

        doc.modified = false;
        doc.clear_cell(&loc("A1"));
        assert!(doc.modified);
        assert!(!doc.worksheet.contains(&loc("A1")));
    }

    #[test]
    fn test_paste_without_clipboard_fails() {
        let mut doc = Document::new();
        let err = doc.paste_to(loc("A1"), loc("A1"));
        assert!(matches!(err, Err(GridcalcError::NothingToPaste)));
    }

    #[test]
    fn test_cut_paste_moves_formula_and_its_target() {
        let mut doc = Document::new();
        doc.set_cell_from_input(loc("A1"), "=A2");
        doc.set_cell_from_input(loc("A2"), "3");
        doc.cut(loc("A1"), loc("A2")).unwrap();
        let written = doc.paste_to(loc("C2"), loc("C3")).unwrap();
        assert_eq!(written, Bounds::new(3, 2, 3, 3));
        assert_eq!(doc.worksheet.cell_formula(&loc("C2")).as_deref(), Some("=C3"));

        doc.calculate().unwrap();
        assert_eq!(doc.get_cell_display(&loc("C2")), "3");
    }

    #[test]
    fn test_copy_paste_shifts_relative_references() {
        let mut doc = Document::new();
        doc.set_cell_from_input(loc("A1"), "2");
        doc.set_cell_from_input(loc("B1"), "=A1 * 10");
        doc.copy(loc("B1"), loc("B1")).unwrap();
        doc.paste_to(loc("B2"), loc("B3")).unwrap();
        assert_eq!(doc.worksheet.cell_formula(&loc("B3")).as_deref(), Some("=A3 * 10"));
        // the source is untouched by a copy
        assert_eq!(doc.worksheet.cell_formula(&loc("B1")).as_deref(), Some("=A1 * 10"));
    }
}
