//! Integration tests for the gridcalc binary

use std::path::PathBuf;
use std::process::Command;

fn run_gridcalc(args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .arg("run")
        .arg("-q")
        .arg("--")
        // Tests must be deterministic and not depend on a user's ~/.config/gridcalc/default.rhai.
        .arg("--no-default-functions")
        .args(args)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    (stdout, stderr, exit_code)
}

fn temp_file(tag: &str, ext: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "gridcalc_cli_{}_{}_{:?}.{}",
        tag,
        std::process::id(),
        std::thread::current().id(),
        ext
    ));
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_basic_arithmetic() {
    let (stdout, _, code) = run_gridcalc(&["-c", "5 + 3"]);
    assert_eq!(stdout.trim(), "8");
    assert_eq!(code, 0);
}

#[test]
fn test_auto_prepend_equals() {
    let (stdout1, _, _) = run_gridcalc(&["-c", "10 + 5"]);
    let (stdout2, _, _) = run_gridcalc(&["-c", "=10 + 5"]);
    assert_eq!(stdout1, stdout2);
}

#[test]
fn test_boolean_output() {
    let (stdout, _, code) = run_gridcalc(&["-c", "1 < 2"]);
    assert_eq!(stdout.trim(), "TRUE");
    assert_eq!(code, 0);
}

#[test]
fn test_division_by_zero() {
    let (stdout, _, code) = run_gridcalc(&["-c", "1/0"]);
    assert!(stdout.starts_with("#ERR EvaluationError"), "{stdout}");
    assert_eq!(code, 1);
}

#[test]
fn test_syntax_error_exit_code() {
    let (stdout, _, code) = run_gridcalc(&["-c", "1 +"]);
    assert!(stdout.starts_with("#ERR FormulaError"), "{stdout}");
    assert_eq!(code, 1);
}

#[test]
fn test_command_sees_set_cells() {
    let (stdout, _, code) = run_gridcalc(&["-s", "A1=4", "-s", "A2==A1 * 10", "-c", "SUM(A1:A2)"]);
    assert_eq!(stdout.trim(), "44");
    assert_eq!(code, 0);
}

#[test]
fn test_custom_functions() {
    let func_file = temp_file("funcs", "rhai", "fn double(x) { x * 2 }\n");
    let path = func_file.to_string_lossy().to_string();

    let (stdout, _, code) = run_gridcalc(&["-c", "double(21)", "-f", &path]);
    assert_eq!(stdout.trim(), "42");
    assert_eq!(code, 0);

    std::fs::remove_file(func_file).ok();
}

#[test]
fn test_sheet_listing_and_console() {
    let sheet = temp_file("sheet", "grd", "# test\nA1: 2\nA2: =A1 ** 8\nB1: =A2 / 0\n");
    let path = sheet.to_string_lossy().to_string();

    let (stdout, _, code) = run_gridcalc(&[&path]);
    assert_eq!(code, 0);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "A1: 2");
    assert_eq!(lines[1], "B1: #ERR EvaluationError: division by zero");
    assert_eq!(lines[2], "A2: 256");
    assert!(stdout.contains("    Formula '=A2 / 0' in B1"));
    assert!(stdout.contains("Took "));

    std::fs::remove_file(sheet).ok();
}

#[test]
fn test_cycle_is_listed_not_hung() {
    let (stdout, _, code) = run_gridcalc(&["-s", "A1==A2", "-s", "A2==A1", "--timeout", "10"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("A1: #ERR CycleError: A1 -> A2 -> A1"), "{stdout}");
}

#[test]
fn test_output_writes_grd() {
    let out = std::env::temp_dir().join(format!("gridcalc_cli_out_{}.grd", std::process::id()));
    let out_path = out.to_string_lossy().to_string();

    let (_, stderr, code) = run_gridcalc(&["-s", "B2=hello", "-o", &out_path]);
    assert_eq!(code, 0);
    assert!(stderr.contains("Saved to"));
    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.contains("B2: hello"));

    std::fs::remove_file(out).ok();
}

#[test]
fn test_bad_config_is_reported() {
    let config = temp_file("config", "toml", "workers = 0\n");
    let path = config.to_string_lossy().to_string();

    let (_, stderr, code) = run_gridcalc(&["--config", &path, "-c", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("workers"), "{stderr}");

    std::fs::remove_file(config).ok();
}
