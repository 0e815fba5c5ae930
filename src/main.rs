//! gridcalc - recalculate a worksheet from the command line

mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use gridcalc_core::{CellRef, Document};
use gridcalc_engine::engine::{EvaluationContext, error_text, format_dynamic};
use gridcalc_engine::formula::compile_formula;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridcalc", version)]
#[command(about = "Recalculate a spreadsheet whose formulas compile to Rhai")]
struct Cli {
    /// Worksheet file to load (.grd)
    file: Option<PathBuf>,

    /// Load custom Rhai functions (can be repeated)
    #[arg(short = 'f', long = "functions", value_name = "FILE")]
    functions: Vec<PathBuf>,

    /// Do not auto-load default.rhai from the config dir
    #[arg(long)]
    no_default_functions: bool,

    /// Evaluate one formula against the sheet and print its value
    #[arg(short = 'c', long = "command", value_name = "FORMULA")]
    command: Option<String>,

    /// Set a cell before calculating, e.g. `B2==A1*2` (can be repeated)
    #[arg(short = 's', long = "set", value_name = "CELL=TEXT", value_parser = parse_assignment)]
    set: Vec<(CellRef, String)>,

    /// Worker threads evaluating cells
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Give up on the recalculation after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Read settings from this TOML file instead of the config dir
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save the worksheet here after applying --set
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
}

fn parse_assignment(arg: &str) -> std::result::Result<(CellRef, String), String> {
    let (cell, text) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected CELL=TEXT, got '{}'", arg))?;
    let cell_ref: CellRef = cell.trim().parse()?;
    Ok((cell_ref, text.to_string()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("GRIDCALC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the document: config, functions files, the worksheet and any
/// `--set` assignments.
fn open_document(cli: &Cli) -> Result<Document> {
    let config = config::load_config(cli.config.as_deref())?;

    let mut functions = Vec::new();
    if !cli.no_default_functions
        && let Some(path) = config::default_functions_path()
        && path.is_file()
    {
        functions.push(path);
    }
    functions.extend(config.functions.iter().cloned());
    functions.extend(cli.functions.iter().cloned());

    let (mut doc, warnings) = Document::with_file(cli.file.clone(), functions)
        .with_context(|| match &cli.file {
            Some(path) => format!("Failed to open {}", path.display()),
            None => "Failed to create worksheet".to_string(),
        })?;
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }

    doc.recalc = config::recalc_config(&config, cli.workers, cli.timeout)?;
    if let Some(path) = &config.usercode {
        doc.usercode = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user code {}", path.display()))?;
    }

    for (cell_ref, text) in &cli.set {
        doc.set_cell_from_input(*cell_ref, text);
    }
    Ok(doc)
}

/// Evaluate `formula` against the calculated sheet. Prints the value, or
/// `#ERR` and the error, and reports whether it succeeded.
fn run_command(doc: &Document, formula: &str) -> bool {
    let formula = if formula.starts_with('=') {
        formula.to_string()
    } else {
        format!("={}", formula)
    };
    let worksheet = &doc.worksheet;
    let compiled = compile_formula(worksheet.parser(), &formula, Some(worksheet.name()));

    let (context, functions_error) =
        EvaluationContext::with_functions(worksheet, doc.custom_functions.as_deref());
    if let Some(message) = functions_error {
        eprintln!("Warning: {}", message);
    }

    match context.evaluate(&compiled.expression) {
        Ok(value) => {
            println!("{}", format_dynamic(&value));
            true
        }
        Err(err) => {
            println!("#ERR {}", error_text(&err));
            false
        }
    }
}

fn print_sheet(doc: &Document) {
    for cell_ref in doc.worksheet.locations() {
        let Some(cell) = doc.worksheet.get(&cell_ref) else {
            continue;
        };
        if cell.formula().is_none() {
            continue;
        }
        match &cell.error {
            Some(error) => println!("{}: #ERR {}", cell_ref, error),
            None => println!("{}: {}", cell_ref, cell.formatted_value),
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut doc = open_document(&cli)?;
    doc.calculate()?;

    if let Some(path) = &cli.output {
        let saved = doc.save_file(Some(path))?;
        eprintln!("Saved to {}", saved.display());
    }

    if let Some(formula) = &cli.command {
        let ok = run_command(&doc, formula);
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    print_sheet(&doc);
    println!("{}", doc.console_text());
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
