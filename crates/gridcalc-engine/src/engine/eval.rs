//! Rhai engine creation and formula evaluation.
//!
//! An [`EvaluationContext`] is built once per recalculation and shared by
//! every worker: the engine is bound to the worksheet's grid, user functions
//! are compiled once and merged into each formula, and user-defined names
//! live in a scope that each evaluation clones.

use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::worksheet::Worksheet;

/// Resolves `<Name>` worksheet references.
pub type WorksheetProvider = Arc<dyn Fn(&str) -> Option<Worksheet> + Send + Sync>;

pub(crate) type SharedProvider = Arc<RwLock<Option<WorksheetProvider>>>;

/// Error raised by evaluations cut short by [`EvaluationContext::interrupt`].
pub(crate) const INTERRUPTED: &str = "EvaluationError: recalculation interrupted";

/// Create a Rhai engine with built-ins bound to `worksheet`.
///
/// `print` output goes to the worksheet console.
pub fn create_engine(worksheet: &Worksheet) -> Engine {
    build_engine(worksheet, Arc::default(), None)
}

fn build_engine(
    worksheet: &Worksheet,
    provider: SharedProvider,
    interrupted: Option<Arc<AtomicBool>>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(256, 256);
    crate::builtins::register_builtins(&mut engine, worksheet, provider, interrupted.clone());

    let console = worksheet.console().clone();
    engine.on_print(move |text| console.append(&format!("{text}\n")));

    if let Some(flag) = interrupted {
        engine.on_progress(move |_| {
            if flag.load(Ordering::Relaxed) {
                Some(Dynamic::from(INTERRUPTED))
            } else {
                None
            }
        });
    }
    engine
}

/// Everything a formula can see while it is evaluated.
pub struct EvaluationContext {
    engine: Engine,
    functions: Option<AST>,
    scope: Scope<'static>,
    provider: SharedProvider,
    interrupted: Arc<AtomicBool>,
    worksheet: Worksheet,
}

impl EvaluationContext {
    pub fn new(worksheet: &Worksheet) -> EvaluationContext {
        let provider: SharedProvider = Arc::default();
        let interrupted = Arc::new(AtomicBool::new(false));
        EvaluationContext {
            engine: build_engine(worksheet, provider.clone(), Some(interrupted.clone())),
            functions: None,
            scope: Scope::new(),
            provider,
            interrupted,
            worksheet: worksheet.clone(),
        }
    }

    /// Create a context and compile user functions from `script`.
    /// Returns the context and any compile error message; on error the
    /// context has no user functions.
    pub fn with_functions(
        worksheet: &Worksheet,
        script: Option<&str>,
    ) -> (EvaluationContext, Option<String>) {
        let mut context = EvaluationContext::new(worksheet);
        let error = script.and_then(|script| match context.engine.compile(script) {
            Ok(ast) => {
                context.functions = Some(ast);
                None
            }
            Err(e) => Some(format!("Error in custom functions: {}", e)),
        });
        (context, error)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn functions(&self) -> Option<&AST> {
        self.functions.as_ref()
    }

    pub fn worksheet(&self) -> &Worksheet {
        &self.worksheet
    }

    /// Define a name visible to every formula.
    pub fn set_name(&mut self, name: &str, value: Dynamic) {
        self.scope.set_value(name.to_string(), value);
    }

    /// Install the lookup behind `<Name>` references. Without one, only the
    /// context's own worksheet resolves.
    pub fn set_worksheet_provider(&self, provider: WorksheetProvider) {
        let mut slot = self.provider.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(provider);
    }

    /// Ask running and future evaluations to stop.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Evaluate a compiled formula, with user functions and names in scope.
    pub fn evaluate(&self, script: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut scope = self.scope.clone();
        let ast = self
            .engine
            .compile_with_scope(&scope, script)
            .map_err(|e| Box::new(EvalAltResult::ErrorParsing(*e.0, e.1)))?;
        let ast = match &self.functions {
            Some(functions) => functions.clone().merge(&ast),
            None => ast,
        };
        self.engine.eval_ast_with_scope(&mut scope, &ast)
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("worksheet", &self.worksheet.name())
            .field("functions", &self.functions.is_some())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CellRef;

    #[test]
    fn test_evaluate_reads_cells() {
        let ws = Worksheet::new("Sheet1");
        ws.cell(CellRef::new(1, 1)).set_value(Dynamic::from(4_i64));
        let ctx = EvaluationContext::new(&ws);
        let result = ctx.evaluate("CELL(1, 1) * 2").unwrap();
        assert_eq!(result.as_int().unwrap(), 8);
    }

    #[test]
    fn test_custom_functions_are_merged() {
        let ws = Worksheet::new("Sheet1");
        let (ctx, error) =
            EvaluationContext::with_functions(&ws, Some("fn double(x) { x * 2 }"));
        assert!(error.is_none());
        assert_eq!(ctx.evaluate("double(21)").unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_bad_functions_script_reports_error() {
        let ws = Worksheet::new("Sheet1");
        let (ctx, error) = EvaluationContext::with_functions(&ws, Some("fn broken( {"));
        assert!(error.unwrap().starts_with("Error in custom functions"));
        assert!(ctx.functions().is_none());
    }

    #[test]
    fn test_names_are_visible_but_not_mutated() {
        let ws = Worksheet::new("Sheet1");
        let mut ctx = EvaluationContext::new(&ws);
        ctx.set_name("rate", Dynamic::from(3_i64));
        assert_eq!(ctx.evaluate("rate + 1").unwrap().as_int().unwrap(), 4);
        ctx.evaluate("rate = 10").unwrap();
        assert_eq!(ctx.evaluate("rate").unwrap().as_int().unwrap(), 3);
    }

    #[test]
    fn test_print_goes_to_console() {
        let ws = Worksheet::new("Sheet1");
        let ctx = EvaluationContext::new(&ws);
        ctx.evaluate("print(\"hi\")").unwrap();
        assert_eq!(ws.console().text(), "hi\n");
    }

    #[test]
    fn test_interrupt_aborts_evaluation() {
        let ws = Worksheet::new("Sheet1");
        let ctx = EvaluationContext::new(&ws);
        ctx.interrupt();
        assert!(ctx.evaluate("let x = 0; loop { x += 1; }").is_err());
        ws.cell(CellRef::new(1, 1)).set_value(Dynamic::from(1_i64));
        assert!(ctx.evaluate("SUM(RANGE(1, 1, 1, 1))").is_err());
        ctx.clear_interrupt();
        assert!(ctx.evaluate("1 + 1").is_ok());
    }
}
