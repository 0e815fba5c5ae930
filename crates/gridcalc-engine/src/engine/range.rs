//! The `CellRange` value that range references evaluate to.

use rhai::{Array, Dynamic};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::cell::Grid;
use super::cell_ref::{Bounds, CellRef};
use super::eval::INTERRUPTED;

/// A live view of a rectangle of cells. Reading goes through the grid, so
/// values are whatever the cells hold at lookup time.
///
/// Iteration stops at the last populated row and column of the grid, and
/// fails as soon as the owning recalculation is interrupted.
#[derive(Clone)]
pub struct SheetRange {
    grid: Grid,
    bounds: Bounds,
    interrupt: Option<Arc<AtomicBool>>,
}

impl SheetRange {
    pub fn new(grid: Grid, bounds: Bounds) -> SheetRange {
        SheetRange {
            grid,
            bounds,
            interrupt: None,
        }
    }

    /// Abort iteration once `flag` is raised.
    pub fn with_interrupt(mut self, flag: Option<Arc<AtomicBool>>) -> SheetRange {
        self.interrupt = flag;
        self
    }

    fn check_interrupt(&self) -> Result<(), String> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(INTERRUPTED.to_string()),
            _ => Ok(()),
        }
    }

    /// The part of the range up to the grid's last populated row and column.
    fn populated_bounds(&self) -> Option<Bounds> {
        let (right, bottom) = self.grid.iter().fold((0, 0), |(right, bottom), entry| {
            (right.max(entry.key().col), bottom.max(entry.key().row))
        });
        let right = self.bounds.right.min(right);
        let bottom = self.bounds.bottom.min(bottom);
        (right >= self.bounds.left && bottom >= self.bounds.top)
            .then(|| Bounds::new(self.bounds.left, self.bounds.top, right, bottom))
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.bounds.cell_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locations visited by iteration, row-major.
    pub fn locations(&self) -> impl Iterator<Item = CellRef> + '_ {
        self.populated_bounds().into_iter().flat_map(|b| {
            (b.top..=b.bottom).flat_map(move |row| (b.left..=b.right).map(move |col| CellRef::new(col, row)))
        })
    }

    /// Feed each value to `f`, row-major. Stops at the first error, a cell
    /// holding an error, or an interrupt.
    pub fn try_for_each<E>(
        &self,
        on_error: impl Fn(String) -> E,
        mut f: impl FnMut(Dynamic) -> Result<(), E>,
    ) -> Result<(), E> {
        for location in self.locations() {
            self.check_interrupt().map_err(&on_error)?;
            f(self.value_at(location).map_err(&on_error)?)?;
        }
        Ok(())
    }

    /// A cell's value. Undefined and missing cells read as `()`; a cell
    /// holding an error yields that error text.
    pub fn value_at(&self, location: CellRef) -> Result<Dynamic, String> {
        lookup(&self.grid, location)
    }

    pub fn values(&self) -> Result<Array, String> {
        let mut values = Array::new();
        self.try_for_each(|e| e, |value| {
            values.push(value);
            Ok(())
        })?;
        Ok(values)
    }

    /// Resolve a 1-based `(col, row)` index. Negative indices count back
    /// from the last column or row.
    pub fn location(&self, col: i64, row: i64) -> Result<CellRef, String> {
        if col == 0 || row == 0 {
            return Err("Cell ranges are 1-indexed".to_string());
        }
        let axis = |index: i64, size: usize, start: usize, label: &str| {
            let size_i = size as i64;
            if index.unsigned_abs() > size as u64 {
                return Err(format!("Cell range only has {size} {label}"));
            }
            let offset = if index > 0 { index - 1 } else { size_i + index };
            Ok(start + offset as usize)
        };
        Ok(CellRef::new(
            axis(col, self.bounds.width(), self.bounds.left, "columns")?,
            axis(row, self.bounds.height(), self.bounds.top, "rows")?,
        ))
    }

    pub fn contains(&self, value: &Dynamic) -> Result<bool, String> {
        for loc in self.locations() {
            self.check_interrupt()?;
            if values_equal(&self.value_at(loc)?, value) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Read a cell for a formula.
pub(crate) fn lookup(grid: &Grid, location: CellRef) -> Result<Dynamic, String> {
    match grid.get(&location) {
        Some(cell) => match &cell.error {
            Some(error) => Err(error.clone()),
            None => Ok(cell.value.clone().unwrap_or(Dynamic::UNIT)),
        },
        None => Ok(Dynamic::UNIT),
    }
}

/// Equality across the numeric types, strings, booleans and unit.
pub(crate) fn values_equal(a: &Dynamic, b: &Dynamic) -> bool {
    let number = |v: &Dynamic| v.as_float().ok().or_else(|| v.as_int().ok().map(|i| i as f64));
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return x == y;
    }
    if a.is_unit() || b.is_unit() {
        return a.is_unit() && b.is_unit();
    }
    if let (Ok(x), Ok(y)) = (a.as_bool(), b.as_bool()) {
        return x == y;
    }
    if a.is_string() && b.is_string() {
        return a.clone().into_string().ok() == b.clone().into_string().ok();
    }
    false
}

impl IntoIterator for SheetRange {
    type Item = Dynamic;
    type IntoIter = std::vec::IntoIter<Dynamic>;

    fn into_iter(self) -> Self::IntoIter {
        self.locations()
            .take_while(|_| self.check_interrupt().is_ok())
            .map(|loc| self.value_at(loc).unwrap_or(Dynamic::UNIT))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl fmt::Display for SheetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CellRange {} to {}>",
            CellRef::new(self.bounds.left, self.bounds.top),
            CellRef::new(self.bounds.right, self.bounds.bottom)
        )
    }
}

impl fmt::Debug for SheetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetRange")
            .field("bounds", &self.bounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cell;
    use dashmap::DashMap;

    fn grid_with(values: &[(CellRef, i64)]) -> Grid {
        let grid: Grid = Arc::new(DashMap::new());
        for (loc, v) in values {
            let mut cell = Cell::new();
            cell.set_value(Dynamic::from(*v));
            grid.insert(*loc, cell);
        }
        grid
    }

    #[test]
    fn test_values_in_row_major_order() {
        let grid = grid_with(&[(CellRef::new(1, 1), 1), (CellRef::new(2, 1), 2), (CellRef::new(1, 2), 3)]);
        let range = SheetRange::new(grid, Bounds::new(1, 1, 2, 2));
        let values: Vec<String> = range.values().unwrap().iter().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["1", "2", "3", "()"]);
        assert_eq!(range.len(), 4);
        assert_eq!(range.to_string(), "<CellRange A1 to B2>");
    }

    #[test]
    fn test_indexing_is_one_based_with_negatives() {
        let range = SheetRange::new(grid_with(&[]), Bounds::new(2, 3, 4, 6));
        assert_eq!(range.location(1, 1), Ok(CellRef::new(2, 3)));
        assert_eq!(range.location(-1, -1), Ok(CellRef::new(4, 6)));
        assert_eq!(range.location(-3, 2), Ok(CellRef::new(2, 4)));
        assert!(range.location(0, 1).is_err());
        assert_eq!(
            range.location(4, 1),
            Err("Cell range only has 3 columns".to_string())
        );
    }

    #[test]
    fn test_errors_surface_on_read() {
        let grid = grid_with(&[]);
        let mut cell = Cell::new();
        cell.set_error("CycleError: A1 -> A1");
        grid.insert(CellRef::new(1, 1), cell);
        let range = SheetRange::new(grid, Bounds::new(1, 1, 1, 2));
        assert_eq!(range.values().unwrap_err(), "CycleError: A1 -> A1");
    }

    #[test]
    fn test_iteration_stops_at_populated_extent() {
        let grid = grid_with(&[(CellRef::new(1, 1), 1), (CellRef::new(1, 3), 3)]);
        let range = SheetRange::new(grid, Bounds::new(1, 1, 4, usize::MAX));
        assert_eq!(range.len(), usize::MAX);
        let values: Vec<String> = range.values().unwrap().iter().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["1", "()", "3"]);
        let outside = SheetRange::new(grid_with(&[(CellRef::new(1, 1), 1)]), Bounds::new(2, 2, 9, 9));
        assert_eq!(outside.locations().count(), 0);
    }

    #[test]
    fn test_interrupt_stops_iteration() {
        let grid = grid_with(&[(CellRef::new(1, 1), 1), (CellRef::new(1, 2), 2)]);
        let flag = Arc::new(AtomicBool::new(true));
        let range = SheetRange::new(grid, Bounds::new(1, 1, 1, 2)).with_interrupt(Some(flag.clone()));
        assert_eq!(range.values().unwrap_err(), INTERRUPTED);
        assert_eq!(range.contains(&Dynamic::from(2_i64)), Err(INTERRUPTED.to_string()));
        assert_eq!(range.clone().into_iter().count(), 0);
        flag.store(false, Ordering::Relaxed);
        assert_eq!(range.values().unwrap().len(), 2);
    }

    #[test]
    fn test_contains_compares_numbers_across_types() {
        let grid = grid_with(&[(CellRef::new(1, 1), 2)]);
        let range = SheetRange::new(grid, Bounds::new(1, 1, 1, 1));
        assert_eq!(range.contains(&Dynamic::from(2.0_f64)), Ok(true));
        assert_eq!(range.contains(&Dynamic::from("2")), Ok(false));
    }
}
