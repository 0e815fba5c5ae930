//! Concurrent recalculation.
//!
//! Cells are evaluated leaves first by a pool of scoped worker threads
//! sharing a ready queue. When a cell finishes, every node waiting on it
//! drops it from its pending set; a node whose set empties is queued.

use rhai::{Dynamic, EvalAltResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::cell_ref::CellRef;
use super::eval::EvaluationContext;
use super::graph::{DependencyGraph, build_dependency_graph};
use super::worksheet::Worksheet;

/// Scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecalcConfig {
    /// Worker threads evaluating cells.
    pub workers: usize,
    /// How long an idle worker waits before re-checking for work.
    pub poll_interval: Duration,
    /// Give up on the recalculation after this long.
    pub timeout: Option<Duration>,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        RecalcConfig {
            workers: 10,
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

/// How a recalculation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecalcOutcome {
    /// Every computed cell was evaluated exactly once.
    Completed,
    /// The deadline passed. Cells not yet reached keep no value.
    Interrupted,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<CellRef>,
    closed: bool,
}

struct Scheduler<'a> {
    worksheet: &'a Worksheet,
    context: &'a EvaluationContext,
    graph: &'a DependencyGraph,
    queue: Mutex<QueueState>,
    changed: Condvar,
    remaining: AtomicUsize,
    poll_interval: Duration,
}

impl Scheduler<'_> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, location: CellRef) {
        self.lock().ready.push_back(location);
        self.changed.notify_one();
    }

    fn next(&self) -> Option<CellRef> {
        let mut state = self.lock();
        loop {
            if state.closed || self.remaining.load(Ordering::Acquire) == 0 {
                return None;
            }
            if let Some(location) = state.ready.pop_front() {
                return Some(location);
            }
            state = self
                .changed
                .wait_timeout(state, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn work(&self) {
        while let Some(location) = self.next() {
            if let Some(node) = self.graph.get(&location) {
                if !node.is_cycle() {
                    recalculate_cell(self.worksheet, self.context, location);
                }
                for parent in node.parents() {
                    if self.graph.get(parent).is_some_and(|p| p.resolve(&location)) {
                        self.push(*parent);
                    }
                }
            }
            self.remaining.fetch_sub(1, Ordering::AcqRel);
            self.changed.notify_all();
        }
    }

    /// Wait for the workers to drain the graph or for the deadline.
    fn supervise(&self, deadline: Option<Instant>) -> RecalcOutcome {
        let mut state = self.lock();
        let outcome = loop {
            if self.remaining.load(Ordering::Acquire) == 0 {
                break RecalcOutcome::Completed;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.context.interrupt();
                        break RecalcOutcome::Interrupted;
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            state = self
                .changed
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        };
        state.closed = true;
        drop(state);
        self.changed.notify_all();
        outcome
    }
}

/// Evaluate one computed cell and record its value or error.
fn recalculate_cell(worksheet: &Worksheet, context: &EvaluationContext, location: CellRef) {
    let Some(script) = worksheet
        .get(&location)
        .and_then(|cell| cell.compiled().map(str::to_string))
    else {
        return;
    };
    match context.evaluate(&script) {
        Ok(value) => worksheet.cell(location).set_value(value),
        Err(err) => worksheet.report_cell_error(location, error_text(&err)),
    }
    tracing::debug!(cell = %location, "evaluated");
}

const ERROR_CLASSES: &[&str] = &["FormulaError:", "CycleError:", "EvaluationError:"];

/// The text stored on a cell whose evaluation failed.
///
/// Errors thrown by lookups and formula raisers already carry their class
/// and pass through unchanged. Everything else is an `EvaluationError`.
pub fn error_text(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => error_text(inner),
        EvalAltResult::ErrorRuntime(value, _) | EvalAltResult::ErrorTerminated(value, _)
            if value.is_string() =>
        {
            let text = value.to_string();
            if ERROR_CLASSES.iter().any(|class| text.starts_with(class)) {
                text
            } else {
                format!("EvaluationError: {}", text)
            }
        }
        other => format!("EvaluationError: {}", other),
    }
}

/// Build the dependency graph and evaluate every computed cell.
pub fn evaluate_formulae(worksheet: &Worksheet, context: &EvaluationContext) -> RecalcOutcome {
    evaluate_formulae_with(worksheet, context, &RecalcConfig::default())
}

/// [`evaluate_formulae`] with explicit scheduler settings.
pub fn evaluate_formulae_with(
    worksheet: &Worksheet,
    context: &EvaluationContext,
    config: &RecalcConfig,
) -> RecalcOutcome {
    let span = tracing::info_span!("recalculate", sheet = worksheet.name());
    let _guard = span.enter();
    let started = Instant::now();

    let (graph, leaves) = build_dependency_graph(worksheet);
    let scheduler = Scheduler {
        worksheet,
        context,
        graph: &graph,
        queue: Mutex::new(QueueState {
            ready: leaves.into(),
            closed: false,
        }),
        changed: Condvar::new(),
        remaining: AtomicUsize::new(graph.len()),
        poll_interval: config.poll_interval,
    };
    let deadline = config.timeout.map(|timeout| started + timeout);
    let workers = config.workers.clamp(1, graph.len().max(1));

    let outcome = thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| scheduler.work());
        }
        scheduler.supervise(deadline)
    });
    context.clear_interrupt();

    match outcome {
        RecalcOutcome::Completed => {
            tracing::info!(cells = graph.len(), elapsed = ?started.elapsed(), "recalculated");
        }
        RecalcOutcome::Interrupted => {
            tracing::warn!(
                remaining = scheduler.remaining.load(Ordering::Acquire),
                "recalculation interrupted"
            );
        }
    }
    outcome
}

/// The value a literal formula stands for: an integer, a float, or the
/// text itself.
pub fn eval_constant(text: &str) -> Dynamic {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        Dynamic::from(n)
    } else if let Ok(n) = trimmed.parse::<f64>() {
        Dynamic::from(n)
    } else {
        Dynamic::from(text.to_string())
    }
}

/// Give every literal cell its value and clear its error.
pub fn load_constants(worksheet: &Worksheet) {
    for mut entry in worksheet.grid().iter_mut() {
        let Some(formula) = entry.formula().map(str::to_string) else {
            continue;
        };
        if !formula.starts_with('=') {
            entry.set_value(eval_constant(&formula));
        }
    }
}

/// Clear every value, load literals, then evaluate formulas.
pub fn recalculate(worksheet: &Worksheet, context: &EvaluationContext) -> RecalcOutcome {
    recalculate_with(worksheet, context, &RecalcConfig::default())
}

pub fn recalculate_with(
    worksheet: &Worksheet,
    context: &EvaluationContext,
    config: &RecalcConfig,
) -> RecalcOutcome {
    worksheet.clear_values();
    load_constants(worksheet);
    evaluate_formulae_with(worksheet, context, config)
}
