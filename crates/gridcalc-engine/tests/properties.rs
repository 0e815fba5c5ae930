// Property-based tests for parsing and reference rewriting.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use gridcalc_engine::engine::{Bounds, coordinates_to_cell_name};
use gridcalc_engine::formula::{FormulaParser, rewrite, rewrite_formula};
use proptest::prelude::*;

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A single-cell reference: column, row and the two `$` markers.
#[derive(Clone, Debug)]
struct Ref {
    col: usize,
    row: usize,
    col_abs: bool,
    row_abs: bool,
}

impl Ref {
    fn text(&self) -> String {
        coordinates_to_cell_name(self.col, self.row, self.col_abs, self.row_abs)
            .expect("generated reference is on the grid")
    }

    fn moved(&self, dx: i64, dy: i64, move_absolute: bool) -> String {
        let shift = |index: usize, delta: i64, absolute: bool| {
            if absolute && !move_absolute {
                index
            } else {
                (index as i64 + delta) as usize
            }
        };
        Ref {
            col: shift(self.col, dx, self.col_abs),
            row: shift(self.row, dy, self.row_abs),
            ..self.clone()
        }
        .text()
    }
}

fn arb_ref() -> impl Strategy<Value = Ref> {
    (20usize..=700, 20usize..=5000, any::<bool>(), any::<bool>()).prop_map(
        |(col, row, col_abs, row_abs)| Ref {
            col,
            row,
            col_abs,
            row_abs,
        },
    )
}

fn arb_ws() -> impl Strategy<Value = &'static str> {
    prop_oneof![3 => Just(""), 1 => Just(" "), 1 => Just("  ")]
}

fn arb_leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => arb_ref().prop_map(|r| r.text()),
        1 => (arb_ref(), arb_ref()).prop_map(|(a, b)| format!("{}:{}", a.text(), b.text())),
        2 => r"[1-9][0-9]{0,3}(\.[0-9]{1,2})?",
        1 => r#""[a-z ]{0,6}""#,
        1 => Just("A_".to_string()),
        1 => Just("_12".to_string()),
        1 => Just("#Total#_".to_string()),
        1 => Just("Sheet2!B7".to_string()),
        1 => Just("'My Sheet' ! C3".to_string()),
        1 => Just("<Sheet2>".to_string()),
    ]
}

fn arb_expr() -> impl Strategy<Value = String> {
    arb_leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (
                inner.clone(),
                prop_oneof![Just("+"), Just("-"), Just("*"), Just("/"), Just("&")],
                arb_ws(),
                inner.clone(),
                arb_ws()
            )
                .prop_map(|(a, op, ws, b, ws2)| format!("{a}{ws}{op}{ws2}{b}")),
            (inner.clone(), arb_ws()).prop_map(|(a, ws)| format!("({ws}{a})")),
            (prop_oneof![Just("SUM"), Just("MAX"), Just("total")], inner.clone(), inner, arb_ws())
                .prop_map(|(f, a, b, ws)| format!("{f}({a},{ws}{b})")),
        ]
    })
}

fn arb_formula() -> impl Strategy<Value = String> {
    (arb_ws(), arb_expr()).prop_map(|(ws, e)| format!("={ws}{e}"))
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn test_flatten_reproduces_source(text in arb_formula()) {
        let parser = FormulaParser::new();
        let tree = parser.parse(&text).map_err(|e| TestCaseError::fail(format!("{text}: {e}")))?;
        prop_assert_eq!(tree.flatten(), text);
    }

    #[test]
    fn test_zero_offset_rewrite_is_identity(
        text in arb_formula(),
        is_cut in any::<bool>(),
        a in arb_ref(),
        b in arb_ref(),
    ) {
        let parser = FormulaParser::new();
        let tree = parser.parse(&text).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let source = Bounds::new(a.col, a.row, b.col, b.row);
        prop_assert_eq!(rewrite(&tree, 0, 0, is_cut, source).flatten(), text);
    }

    #[test]
    fn test_cut_moves_references_inside_source_only(
        r in arb_ref(),
        dx in -10i64..=10,
        dy in -10i64..=10,
        inside in any::<bool>(),
    ) {
        let parser = FormulaParser::new();
        let source = if inside {
            Bounds::new(r.col - 1, r.row - 1, r.col + 1, r.row + 1)
        } else {
            Bounds::new(r.col + 1, r.row + 1, r.col + 3, r.row + 3)
        };
        let formula = format!("={}", r.text());
        let expected = if inside {
            format!("={}", r.moved(dx, dy, true))
        } else {
            formula.clone()
        };
        prop_assert_eq!(rewrite_formula(&parser, &formula, dx, dy, true, source), expected);
    }

    #[test]
    fn test_copy_moves_relative_axes_anywhere(
        r in arb_ref(),
        dx in -10i64..=10,
        dy in -10i64..=10,
        far in any::<bool>(),
    ) {
        let parser = FormulaParser::new();
        let source = if far {
            Bounds::new(1, 1, 2, 2)
        } else {
            Bounds::new(r.col, r.row, r.col, r.row)
        };
        let formula = format!("={} + 1", r.text());
        let expected = format!("={} + 1", r.moved(dx, dy, false));
        prop_assert_eq!(rewrite_formula(&parser, &formula, dx, dy, false, source), expected);
    }
}
