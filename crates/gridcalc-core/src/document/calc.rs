//! Running a calculation: the user code drives constant loading and formula
//! evaluation on a script engine bound to the document's worksheet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rhai::{Dynamic, EvalAltResult, ImmutableString, Position, INT};

use super::{Document, UsercodeError};
use crate::error::{GridcalcError, Result};
use gridcalc_engine::engine::{
    CellRef, EvaluationContext, RecalcConfig, RecalcOutcome, Worksheet, create_engine, error_text,
    evaluate_formulae_with, load_constants,
};

/// User code for a new document: load literals, then evaluate formulas.
pub const DEFAULT_USERCODE: &str = "load_constants();\nevaluate_formulae();\n";

const TIMED_OUT: &str = "recalculation timed out";

fn cell_at(col: INT, row: INT, function: &str) -> std::result::Result<CellRef, Box<EvalAltResult>> {
    match (usize::try_from(col), usize::try_from(row)) {
        (Ok(col), Ok(row)) if col > 0 && row > 0 => Ok(CellRef::new(col, row)),
        _ => Err(EvalAltResult::ErrorRuntime(
            format!("{}: no cell at column {}, row {}", function, col, row).into(),
            Position::NONE,
        )
        .into()),
    }
}

/// Build the engine the user code runs on: the formula builtins plus the
/// calculation steps and cell writers.
fn usercode_engine(
    worksheet: &Worksheet,
    context: Arc<EvaluationContext>,
    config: RecalcConfig,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
) -> rhai::Engine {
    let mut engine = create_engine(worksheet);

    let ws = worksheet.clone();
    engine.register_fn("load_constants", move || load_constants(&ws));

    let ws = worksheet.clone();
    let flag = timed_out.clone();
    engine.register_fn(
        "evaluate_formulae",
        move || -> std::result::Result<(), Box<EvalAltResult>> {
            let mut config = config.clone();
            if let Some(deadline) = deadline {
                config.timeout = Some(deadline.saturating_duration_since(Instant::now()));
            }
            match evaluate_formulae_with(&ws, &context, &config) {
                RecalcOutcome::Completed => Ok(()),
                RecalcOutcome::Interrupted => {
                    flag.store(true, Ordering::Relaxed);
                    Err(EvalAltResult::ErrorTerminated(TIMED_OUT.into(), Position::NONE).into())
                }
            }
        },
    );

    let ws = worksheet.clone();
    engine.register_fn(
        "SET_VALUE",
        move |col: INT, row: INT, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
            let location = cell_at(col, row, "SET_VALUE")?;
            ws.cell(location).set_value(value);
            Ok(())
        },
    );

    let ws = worksheet.clone();
    engine.register_fn(
        "SET_FORMULA",
        move |col: INT, row: INT, text: ImmutableString| -> std::result::Result<(), Box<EvalAltResult>> {
            let location = cell_at(col, row, "SET_FORMULA")?;
            ws.set_cell_formula(location, &text);
            Ok(())
        },
    );

    if let Some(deadline) = deadline {
        engine.on_progress(move |_| {
            if Instant::now() >= deadline {
                timed_out.store(true, Ordering::Relaxed);
                Some(Dynamic::from(TIMED_OUT))
            } else {
                None
            }
        });
    }
    engine
}

fn usercode_failure(err: &EvalAltResult) -> UsercodeError {
    let line = err.position().line();
    let message = match err {
        EvalAltResult::ErrorParsing(kind, _) => format!("Syntax error: {}", kind),
        other => error_text(other),
    };
    UsercodeError { message, line }
}

impl Document {
    /// Recalculate the worksheet by running the user code.
    ///
    /// Errors in the user code are not returned: they go to the console and
    /// to `usercode_error`. Only running past the configured timeout is an
    /// error.
    pub fn calculate(&mut self) -> Result<()> {
        let span = tracing::info_span!("calculate", sheet = self.worksheet.name());
        let _guard = span.enter();
        let started = Instant::now();

        self.worksheet.clear_values();
        self.worksheet.console().clear();
        self.usercode_error = None;

        let (context, functions_error) =
            EvaluationContext::with_functions(&self.worksheet, self.custom_functions.as_deref());
        if let Some(message) = functions_error {
            self.worksheet.add_console_text(&format!("{}\n", message));
        }
        let context = Arc::new(context);

        let deadline = self.recalc.timeout.map(|timeout| started + timeout);
        let timed_out = Arc::new(AtomicBool::new(false));
        let engine = usercode_engine(
            &self.worksheet,
            context.clone(),
            self.recalc.clone(),
            deadline,
            timed_out.clone(),
        );

        let result = engine
            .compile(&self.usercode)
            .map_err(|e| Box::new(EvalAltResult::ErrorParsing(*e.0, e.1)))
            .and_then(|ast| {
                let ast = match context.functions() {
                    Some(functions) => functions.clone().merge(&ast),
                    None => ast,
                };
                engine.run_ast(&ast)
            });

        let outcome = if timed_out.load(Ordering::Relaxed) {
            let timeout = self.recalc.timeout.unwrap_or(Duration::ZERO);
            self.worksheet
                .add_console_text(&format!("Recalculation timed out after {:.2}s\n", timeout.as_secs_f64()));
            Err(GridcalcError::Timeout(timeout))
        } else {
            if let Err(err) = result {
                let failure = usercode_failure(&err);
                tracing::warn!(error = %failure.message, line = ?failure.line, "user code failed");
                let text = match failure.line {
                    Some(line) => format!("{} (line {})\n", failure.message, line),
                    None => format!("{}\n", failure.message),
                };
                self.worksheet.add_console_text(&text);
                self.usercode_error = Some(failure);
            }
            Ok(())
        };

        self.worksheet
            .add_console_text(&format!("Took {:.2}s", started.elapsed().as_secs_f64()));
        outcome
    }
}
