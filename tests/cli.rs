use assert_cmd::prelude::*;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use assert_cmd::Command;

#[test]
fn eval_prints_the_value() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.args(["-e", "(+ 1 2)"]);
    cmd.assert().success().stdout(contains("3\n"));
}

#[test]
fn unhandled_error_exits_with_a_report() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.args(["-e", "(error \"boom\" 1 2)"]);
    cmd.assert().code(70).stderr(
        contains("Unhandled error condition!")
            .and(contains("boom"))
            .and(contains("Stack trace:")),
    );
}

#[test]
fn handled_error_does_not_exit() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.args([
        "-e",
        "(call/ec (lambda (k) (with-handler <error> (lambda (c) (k 'recovered)) (lambda () (car 1)))))",
    ]);
    cmd.assert().success().stdout(contains("recovered\n"));
}

#[test]
fn piped_input_prints_each_value() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.write_stdin("(define x 2)\n(* x 21)\n");
    cmd.assert().success().stdout(contains("2\n42\n"));
}

#[test]
fn piped_input_stops_at_an_unhandled_error() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.write_stdin("(display \"before\")\n(car 1)\n(display \"after\")\n");
    cmd.assert()
        .code(70)
        .stdout(contains("before"))
        .stdout(contains("after").not())
        .stderr(contains("type-mismatch"));
}

#[test]
fn load_runs_a_file_first() {
    let path = std::env::temp_dir().join(format!("condlisp-load-{}.scm", std::process::id()));
    std::fs::write(&path, "(define (triple x) (* 3 x))\n").unwrap();
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.arg("--load").arg(&path).args(["-e", "(triple 14)"]);
    cmd.assert().success().stdout(contains("42\n"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_load_file_fails() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.args(["--load", "/nonexistent/condlisp/file.scm", "-e", "1"]);
    cmd.assert().code(1).stderr(contains("Error loading"));
}

#[test]
fn max_depth_flag_bounds_recursion() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.args([
        "--max-depth",
        "10",
        "-e",
        "(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1))))) (deep 50)",
    ]);
    cmd.assert().code(70).stderr(contains("recursion-too-deep"));
}

#[test]
fn default_depth_limit_follows_the_evaluator_stack() {
    let mut cmd = Command::cargo_bin("condlisp").unwrap();
    cmd.env_remove("CONDLISP_MAX_DEPTH").args([
        "-e",
        "(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1))))) (deep 5000)",
    ]);
    cmd.assert().success().stdout(contains("5000\n"));
}
