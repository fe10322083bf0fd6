use std::io::Write;

use schemelet::Interpreter;
use schemelet::ast::Value;
use tempfile::NamedTempFile;

#[expect(clippy::unwrap_used)] // test code OK
fn source_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_defines_into_toplevel() {
    let file = source_file("(define x 3)\n; a comment\n(define (twice n) (* 2 n))\n");
    let path = file.path().display().to_string();

    let interp = Interpreter::new();
    let results = interp.evaluate_source(&format!("(load \"{path}\") x (twice x) (load invalid)"));
    assert_eq!(
        results,
        vec!["#t", "3", "6", "*** ERROR: Unbound variable: invalid"]
    );
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let missing = dir.path().join("missing.scm");
    let path = missing.display().to_string();

    let interp = Interpreter::new();
    let results = interp.evaluate_source(&format!("(load \"{path}\")"));
    assert_eq!(results, vec![format!("*** ERROR: cannot find \"{path}\"")]);
    assert!(interp.load_file(&missing).is_err());
}

#[test]
fn test_load_stops_at_first_error_keeping_earlier_bindings() {
    let file = source_file("(define a 1) (car ()) (define b 2)");

    let interp = Interpreter::new();
    let err = interp
        .load_file(file.path())
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
    assert!(err.contains("pair required"), "got {err}");
    assert_eq!(interp.evaluate_source("a"), vec!["1"]);
    assert_eq!(
        interp.evaluate_source("b"),
        vec!["*** ERROR: Unbound variable: b"]
    );
}

#[test]
fn test_load_file_returns_true() {
    let file = source_file("(define greeting \"hi\")");

    let interp = Interpreter::new();
    assert_eq!(interp.load_file(file.path()), Ok(Value::Boolean(true)));
    assert_eq!(interp.evaluate_source("greeting"), vec!["\"hi\""]);
}

#[test]
fn test_load_inside_lambda_uses_callers_scope() {
    let file = source_file("(define inner 7)");
    let path = file.path().display().to_string();

    let interp = Interpreter::new();
    let results = interp.evaluate_source(&format!(
        "((lambda () (load \"{path}\") inner)) inner"
    ));
    assert_eq!(results[0], "7");
    assert_eq!(results[1], "*** ERROR: Unbound variable: inner");
}
