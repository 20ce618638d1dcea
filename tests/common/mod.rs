#![allow(dead_code)]

use std::thread;

use condlisp::{EvalError, EvalResult, Machine, MachineConfig, UnhandledPolicy};

/// A machine that hands unhandled errors back instead of exiting.
pub fn machine() -> Machine {
    Machine::new(MachineConfig::default().with_policy(UnhandledPolicy::Return))
        .expect("machine should initialize")
}

/// Evaluate and render with `write`.
pub fn eval(m: &mut Machine, src: &str) -> EvalResult<String> {
    let v = m.eval_str(src)?;
    Ok(m.write_string(v))
}

/// Evaluate on a fresh machine and render, panicking on any error.
pub fn run(src: &str) -> String {
    let mut m = machine();
    match eval(&mut m, src) {
        Ok(s) => s,
        Err(e) => panic!("{} failed: {}", src, e),
    }
}

/// The condition type name of an unhandled error, or a panic if `src`
/// succeeded.
pub fn unhandled_type(m: &mut Machine, src: &str) -> String {
    match m.eval_str(src) {
        Err(EvalError::Unhandled { type_name, .. }) => type_name,
        Err(other) => panic!("{} raised {} instead of a condition", src, other),
        Ok(v) => panic!("{} returned {} instead of failing", src, m.write_string(v)),
    }
}

/// Deep non-tail recursion needs more native stack than a test thread
/// gets by default.
pub fn run_with_large_stack<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(f)
        .expect("failed to spawn test thread with larger stack");
    handle.join().expect("test thread panicked")
}
