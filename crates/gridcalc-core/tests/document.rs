use std::time::Duration;

use gridcalc_core::{CellRef, Document, GridcalcError};
use pretty_assertions::assert_eq;

fn loc(name: &str) -> CellRef {
    CellRef::from_str(name).unwrap()
}

fn doc(cells: &[(&str, &str)]) -> Document {
    let mut doc = Document::new();
    for (name, input) in cells {
        doc.set_cell_from_input(loc(name), input);
    }
    doc
}

fn formula(doc: &Document, name: &str) -> Option<String> {
    doc.worksheet.cell_formula(&loc(name))
}

#[test]
fn test_cut_of_formula_and_target_repoints_formula() {
    let mut doc = doc(&[("A1", "=A2")]);
    doc.cut(loc("A1"), loc("A2")).unwrap();
    doc.paste_to(loc("C2"), loc("C3")).unwrap();
    assert_eq!(formula(&doc, "C2").as_deref(), Some("=C3"));
}

#[test]
fn test_cut_without_target_keeps_reference() {
    let mut doc = doc(&[("A1", "=B3")]);
    doc.cut(loc("A1"), loc("A1")).unwrap();
    doc.paste_to(loc("C2"), loc("C2")).unwrap();
    assert_eq!(formula(&doc, "C2").as_deref(), Some("=B3"));
}

#[test]
fn test_copy_keeps_absolute_reference() {
    let mut doc = doc(&[("A1", "1"), ("A2", "=$A$1+1")]);
    doc.copy(loc("A1"), loc("A2")).unwrap();
    doc.paste_to(loc("B1"), loc("B2")).unwrap();
    assert_eq!(formula(&doc, "B2").as_deref(), Some("=$A$1+1"));

    doc.calculate().unwrap();
    assert_eq!(doc.get_cell_display(&loc("B2")), "2");
}

#[test]
fn test_copy_past_the_top_edge_is_invalid() {
    let mut doc = doc(&[("A1", "1"), ("A2", "=A1+1")]);
    doc.copy(loc("A2"), loc("A2")).unwrap();
    doc.paste_to(loc("B1"), loc("B1")).unwrap();
    assert_eq!(formula(&doc, "B1").as_deref(), Some("=#Invalid!+1"));

    doc.calculate().unwrap();
    let error = doc.get_cell_error(&loc("B1")).unwrap();
    assert!(error.starts_with("FormulaError: "), "{error}");
    assert_eq!(doc.get_cell_display(&loc("B1")), "");
}

#[test]
fn test_cycle_is_reported_and_sheet_still_calculates() {
    let mut doc = doc(&[("A1", "=A2"), ("A2", "=A1"), ("B1", "2"), ("B2", "=B1 ** 3")]);
    doc.recalc.timeout = Some(Duration::from_secs(10));
    doc.calculate().unwrap();
    assert_eq!(
        doc.get_cell_error(&loc("A1")).as_deref(),
        Some("CycleError: A1 -> A2 -> A1")
    );
    assert_eq!(
        doc.get_cell_error(&loc("A2")).as_deref(),
        Some("CycleError: A1 -> A2 -> A1")
    );
    assert_eq!(doc.get_cell_display(&loc("B2")), "8");
    assert!(doc.console_text().contains("Formula '=A2' in A1\n"));
}

#[test]
fn test_recalculation_with_many_workers_matches_single_worker() {
    let cells: Vec<(String, String)> = (1..=60)
        .flat_map(|row| {
            [
                (format!("A{row}"), row.to_string()),
                (format!("B{row}"), format!("=A{row} * 2")),
                (format!("C{row}"), format!("=SUM(B1:B{row})")),
            ]
        })
        .collect();
    let mut results = Vec::new();
    for workers in [1, 8] {
        let mut doc = Document::new();
        for (name, input) in &cells {
            doc.set_cell_from_input(loc(name), input);
        }
        doc.recalc.workers = workers;
        doc.calculate().unwrap();
        results.push(doc.get_cell_display(&loc("C60")));
    }
    assert_eq!(results, vec!["3660".to_string(), "3660".to_string()]);
}

#[test]
fn test_timeout_surfaces_as_error() {
    let mut doc = doc(&[("A1", "=spin()")]);
    doc.custom_functions = Some("fn spin() { loop { } }".to_string());
    doc.recalc.timeout = Some(Duration::from_millis(200));
    let err = doc.calculate();
    assert!(matches!(err, Err(GridcalcError::Timeout(_))));
}
