//! Cut, copy and paste of cell rectangles.
//!
//! A copy pastes with every relative reference shifted. A cut pastes with
//! only the references into the cut rectangle moved, and on its first
//! paste into the source worksheet it also repoints the formulas left
//! behind, so they follow the moved cells. After that paste the clipboard
//! behaves like a copy of the pasted cells.

use crate::error::{GridcalcError, Result};
use gridcalc_engine::engine::{Bounds, Cell, CellRef, Worksheet};
use gridcalc_engine::formula::rewrite_formula;

/// Largest rectangle the clipboard will capture or paste into.
pub(crate) const MAX_CLIPBOARD_CELLS: usize = 1_000_000;

fn check_size(bounds: Bounds) -> Result<Bounds> {
    if bounds.cell_count() > MAX_CLIPBOARD_CELLS {
        return Err(GridcalcError::InvalidRange(format!(
            "{}:{} holds more than {} cells",
            bounds.top_left(),
            CellRef::new(bounds.right, bounds.bottom),
            MAX_CLIPBOARD_CELLS
        )));
    }
    Ok(bounds)
}

#[derive(Clone, Debug, Default, PartialEq)]
struct ClipCell {
    /// Formula text; literals without a formula hold their formatted value.
    formula: String,
    formatted_value: String,
}

/// A captured rectangle of cells.
#[derive(Clone, Debug)]
pub struct Clipboard {
    /// Row-major, `source.width()` cells per row.
    cells: Vec<ClipCell>,
    source: Bounds,
    is_cut: bool,
    /// Worksheet a pending cut came from.
    source_sheet: Option<String>,
}

impl Clipboard {
    /// Capture the rectangle spanned by `start` and `end`.
    pub fn copy(worksheet: &Worksheet, start: CellRef, end: CellRef) -> Result<Clipboard> {
        let source = check_size(Bounds::from_corners(start, end))?;
        let cells = source
            .locations()
            .map(|location| match worksheet.get(&location) {
                Some(cell) => ClipCell {
                    formula: cell
                        .formula()
                        .map(str::to_string)
                        .unwrap_or_else(|| cell.formatted_value.clone()),
                    formatted_value: cell.formatted_value.clone(),
                },
                None => ClipCell::default(),
            })
            .collect();
        Ok(Clipboard {
            cells,
            source,
            is_cut: false,
            source_sheet: None,
        })
    }

    /// Capture the rectangle and remove it from the worksheet.
    pub fn cut(worksheet: &Worksheet, start: CellRef, end: CellRef) -> Result<Clipboard> {
        let mut clipboard = Clipboard::copy(worksheet, start, end)?;
        for location in clipboard.source.locations() {
            worksheet.remove(&location);
        }
        clipboard.is_cut = true;
        clipboard.source_sheet = Some(worksheet.name().to_string());
        Ok(clipboard)
    }

    pub fn source(&self) -> Bounds {
        self.source
    }

    pub fn is_cut(&self) -> bool {
        self.is_cut
    }

    pub fn width(&self) -> usize {
        self.source.width()
    }

    pub fn height(&self) -> usize {
        self.source.height()
    }

    /// Paste into the rectangle `start..=end`, tiling the clipboard when
    /// the destination is larger. `start == end` pastes one copy.
    ///
    /// Returns the rectangle written.
    pub fn paste_to(&mut self, worksheet: &Worksheet, start: CellRef, end: CellRef) -> Result<Bounds> {
        let destination = self.destination(start, end)?;
        let dx = destination.left as i64 - self.source.left as i64;
        let dy = destination.top as i64 - self.source.top as i64;

        if self.is_cut && self.source_sheet.as_deref() == Some(worksheet.name()) {
            rewrite_source_formulas_for_cut(worksheet, self.source, dx, dy);
        }

        let parser = worksheet.parser().clone();
        for (col, row) in (0..destination.height())
            .flat_map(|row| (0..destination.width()).map(move |col| (col, row)))
        {
            let clip = &self.cells[(row % self.height()) * self.width() + col % self.width()];
            let tile_dx = (col / self.width() * self.width()) as i64;
            let tile_dy = (row / self.height() * self.height()) as i64;

            let mut cell = Cell::new();
            if !clip.formula.is_empty() {
                let formula = rewrite_formula(
                    &parser,
                    &clip.formula,
                    dx + tile_dx,
                    dy + tile_dy,
                    self.is_cut,
                    self.source,
                );
                cell.set_formula(Some(&formula), &parser, Some(worksheet.name()));
            }
            cell.formatted_value = clip.formatted_value.clone();
            let location = CellRef::new(destination.left + col, destination.top + row);
            worksheet.grid().insert(location, cell);
        }

        if self.is_cut {
            let far = CellRef::new(destination.right, destination.bottom);
            *self = Clipboard::copy(worksheet, destination.top_left(), far)?;
        }
        tracing::debug!(
            left = destination.left,
            top = destination.top,
            right = destination.right,
            bottom = destination.bottom,
            "pasted"
        );
        Ok(destination)
    }

    fn destination(&self, start: CellRef, end: CellRef) -> Result<Bounds> {
        if start != end {
            return check_size(Bounds::from_corners(start, end));
        }
        let far = start
            .offset(self.width() as i64 - 1, self.height() as i64 - 1)
            .ok_or_else(|| {
                GridcalcError::InvalidRange(format!(
                    "pasting {}x{} cells at {} leaves the grid",
                    self.width(),
                    self.height(),
                    start
                ))
            })?;
        Ok(Bounds::from_corners(start, far))
    }
}

/// Repoint every formula on the worksheet that refers into the cut
/// rectangle `source` by `(dx, dy)`.
fn rewrite_source_formulas_for_cut(worksheet: &Worksheet, source: Bounds, dx: i64, dy: i64) {
    let parser = worksheet.parser().clone();
    for location in worksheet.locations() {
        let Some(formula) = worksheet.cell_formula(&location) else {
            continue;
        };
        let rewritten = rewrite_formula(&parser, &formula, dx, dy, true, source);
        if rewritten != formula {
            worksheet.set_cell_formula(location, &rewritten);
        }
    }
}
