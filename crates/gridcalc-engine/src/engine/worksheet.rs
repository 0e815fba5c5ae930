//! A named, sparse worksheet with its console log.

use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use std::sync::{Arc, Mutex};

use super::cell::{Cell, Grid};
use super::cell_ref::{Bounds, CellRef, MAX_COL, MAX_ROW};
use crate::formula::{DependencyArea, FormulaParser};

/// Append-only text log shared by every thread working on a worksheet.
#[derive(Clone, Debug, Default)]
pub struct Console(Arc<Mutex<String>>);

impl Console {
    pub fn append(&self, text: &str) {
        let mut log = self.0.lock().unwrap_or_else(|e| e.into_inner());
        log.push_str(text);
    }

    pub fn text(&self) -> String {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Cells keyed by location. Cloning shares the cells, console and parser.
#[derive(Clone)]
pub struct Worksheet {
    name: String,
    cells: Grid,
    console: Console,
    parser: Arc<FormulaParser>,
}

impl Default for Worksheet {
    fn default() -> Self {
        Worksheet::new("Sheet1")
    }
}

impl Worksheet {
    pub fn new(name: &str) -> Worksheet {
        Worksheet::with_parser(name, Arc::new(FormulaParser::new()))
    }

    /// A worksheet sharing an existing parser.
    pub fn with_parser(name: &str, parser: Arc<FormulaParser>) -> Worksheet {
        Worksheet {
            name: name.to_string(),
            cells: Arc::new(DashMap::new()),
            console: Console::default(),
            parser,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parser(&self) -> &Arc<FormulaParser> {
        &self.parser
    }

    pub fn grid(&self) -> &Grid {
        &self.cells
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn add_console_text(&self, text: &str) {
        self.console.append(text);
    }

    /// Mark a cell as failed and log the failure with its formula.
    pub fn report_cell_error(&self, location: CellRef, error: String) {
        let formula = {
            let mut cell = self.cell(location);
            cell.set_error(error.clone());
            cell.formula().unwrap_or_default().to_string()
        };
        self.add_console_text(&format!(
            "{}\n    Formula '{}' in {}\n",
            error, formula, location
        ));
    }

    /// The cell at `location`, created empty if missing.
    ///
    /// The returned guard locks a shard of the map; drop it before touching
    /// other cells.
    pub fn cell(&self, location: CellRef) -> RefMut<'_, CellRef, Cell> {
        self.cells.entry(location).or_default()
    }

    pub fn get(&self, location: &CellRef) -> Option<Ref<'_, CellRef, Cell>> {
        self.cells.get(location)
    }

    pub fn contains(&self, location: &CellRef) -> bool {
        self.cells.contains_key(location)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Set a cell's formula. Empty text removes the cell.
    pub fn set_cell_formula(&self, location: CellRef, formula: &str) {
        if formula.is_empty() {
            self.cells.remove(&location);
            return;
        }
        self.cell(location)
            .set_formula(Some(formula), &self.parser, Some(&self.name));
    }

    pub fn cell_formula(&self, location: &CellRef) -> Option<String> {
        self.cells
            .get(location)
            .and_then(|cell| cell.formula().map(str::to_string))
    }

    pub fn remove(&self, location: &CellRef) -> Option<Cell> {
        self.cells.remove(location).map(|(_, cell)| cell)
    }

    /// Forget every value and error. Cells without a formula are dropped.
    pub fn clear_values(&self) {
        self.cells.retain(|_, cell| {
            if cell.formula().is_none() {
                return false;
            }
            cell.clear_value();
            true
        });
    }

    /// Every location in the worksheet, sorted row-major.
    pub fn locations(&self) -> Vec<CellRef> {
        let mut locations: Vec<CellRef> = self.cells.iter().map(|entry| *entry.key()).collect();
        locations.sort_by_key(|loc| (loc.row, loc.col));
        locations
    }

    /// The smallest rectangle holding every non-empty cell.
    pub fn bounds(&self) -> Option<Bounds> {
        self.cells
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .fold(None, |acc: Option<Bounds>, loc| {
                Some(match acc {
                    None => Bounds::new(loc.col, loc.row, loc.col, loc.row),
                    Some(b) => Bounds::new(
                        b.left.min(loc.col),
                        b.top.min(loc.row),
                        b.right.max(loc.col),
                        b.bottom.max(loc.row),
                    ),
                })
            })
    }

    fn header_matches(&self, location: CellRef, header: &str) -> bool {
        self.get(&location)
            .and_then(|cell| cell.formula().map(|f| f.trim().eq_ignore_ascii_case(header.trim())))
            .unwrap_or(false)
    }

    /// The first column whose row-1 cell reads `header` (case-insensitive).
    pub fn named_column(&self, header: &str) -> Option<usize> {
        let used = self.bounds()?;
        (used.left..=used.right).find(|&col| self.header_matches(CellRef::new(col, 1), header))
    }

    /// The first row whose column-A cell reads `header` (case-insensitive).
    pub fn named_row(&self, header: &str) -> Option<usize> {
        let used = self.bounds()?;
        (used.top..=used.bottom).find(|&row| self.header_matches(CellRef::new(1, row), header))
    }

    /// The rectangle an area covers on this worksheet. Columns and rows run
    /// to the edge of the grid. None when a named header is missing.
    pub fn area_bounds(&self, area: &DependencyArea) -> Option<Bounds> {
        Some(match area {
            DependencyArea::Range(bounds) => *bounds,
            DependencyArea::Column(col) => Bounds::new(*col, 1, *col, MAX_ROW),
            DependencyArea::Row(row) => Bounds::new(1, *row, MAX_COL, *row),
            DependencyArea::NamedColumn(header) => {
                let col = self.named_column(header)?;
                Bounds::new(col, 2, col, MAX_ROW)
            }
            DependencyArea::NamedRow(header) => {
                let row = self.named_row(header)?;
                Bounds::new(2, row, MAX_COL, row)
            }
        })
    }
}

impl std::fmt::Debug for Worksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worksheet")
            .field("name", &self.name)
            .field("cells", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_materializes_empty_cell() {
        let ws = Worksheet::new("Sheet1");
        assert!(!ws.contains(&CellRef::new(3, 4)));
        assert!(ws.cell(CellRef::new(3, 4)).is_empty());
        assert!(ws.contains(&CellRef::new(3, 4)));
        assert_eq!(ws.bounds(), None);
    }

    #[test]
    fn test_set_and_clear_formula() {
        let ws = Worksheet::new("Sheet1");
        let a1 = CellRef::new(1, 1);
        ws.set_cell_formula(a1, "=B1");
        assert_eq!(ws.cell_formula(&a1).as_deref(), Some("=B1"));
        assert_eq!(ws.cell(a1).dependencies(), &[CellRef::new(2, 1)]);
        ws.set_cell_formula(a1, "");
        assert!(!ws.contains(&a1));
    }

    #[test]
    fn test_qualified_self_references_are_dependencies() {
        let ws = Worksheet::new("Data");
        ws.set_cell_formula(CellRef::new(1, 1), "=data!B1 + Other!C1");
        assert_eq!(ws.cell(CellRef::new(1, 1)).dependencies(), &[CellRef::new(2, 1)]);
    }

    #[test]
    fn test_clear_values_drops_formula_less_cells() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(1, 1), "5");
        ws.cell(CellRef::new(1, 1)).set_error("boom");
        ws.cell(CellRef::new(9, 9));
        ws.clear_values();
        assert_eq!(ws.locations(), vec![CellRef::new(1, 1)]);
        assert_eq!(ws.cell(CellRef::new(1, 1)).error, None);
    }

    #[test]
    fn test_bounds_and_locations() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(3, 1), "x");
        ws.set_cell_formula(CellRef::new(1, 2), "y");
        assert_eq!(ws.bounds(), Some(Bounds::new(1, 1, 3, 2)));
        assert_eq!(ws.locations(), vec![CellRef::new(3, 1), CellRef::new(1, 2)]);
    }

    #[test]
    fn test_named_headers_and_area_bounds() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(3, 1), " Total ");
        ws.set_cell_formula(CellRef::new(1, 4), "Q1");
        assert_eq!(ws.named_column("total"), Some(3));
        assert_eq!(ws.named_row("q1"), Some(4));
        assert_eq!(ws.named_column("Q1"), None);
        assert_eq!(
            ws.area_bounds(&DependencyArea::NamedColumn("Total".to_string())),
            Some(Bounds::new(3, 2, 3, MAX_ROW))
        );
        assert_eq!(
            ws.area_bounds(&DependencyArea::Row(2)),
            Some(Bounds::new(1, 2, MAX_COL, 2))
        );
        assert_eq!(ws.area_bounds(&DependencyArea::NamedRow("Nope".to_string())), None);
    }

    #[test]
    fn test_report_cell_error_logs_formula() {
        let ws = Worksheet::new("Sheet1");
        ws.set_cell_formula(CellRef::new(2, 3), "=1/0");
        ws.report_cell_error(CellRef::new(2, 3), "EvaluationError: division by zero".to_string());
        assert_eq!(
            ws.cell(CellRef::new(2, 3)).error.as_deref(),
            Some("EvaluationError: division by zero")
        );
        assert_eq!(
            ws.console().text(),
            "EvaluationError: division by zero\n    Formula '=1/0' in B3\n"
        );
    }

    #[test]
    fn test_console_is_shared_between_clones() {
        let ws = Worksheet::new("Sheet1");
        let other = ws.clone();
        other.add_console_text("hello\n");
        assert_eq!(ws.console().text(), "hello\n");
    }
}
