use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use condlisp::{EvalError, Machine, MachineConfig, UnhandledPolicy};

/// Native stack for the evaluator thread. The default `--max-depth` is
/// derived from it.
const EVAL_STACK_BYTES: usize = 256 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "condlisp", version, about = "A small Lisp with a condition system")]
struct Cli {
    /// Evaluate an expression, print its value and exit
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Load a source file before anything else (repeatable)
    #[arg(long = "load")]
    load: Vec<PathBuf>,

    /// Bound on nested (non-tail) evaluation
    #[arg(long = "max-depth")]
    max_depth: Option<usize>,

    /// Heap capacity in cells
    #[arg(long = "heap-cells")]
    heap_cells: Option<usize>,

    /// Entries kept in the stack-trace buffer
    #[arg(long = "trace-depth")]
    trace_depth: Option<usize>,

    /// Log every evaluation step (needs CONDLISP_LOG=trace)
    #[arg(long = "trace", default_value_t = false)]
    trace: bool,
}

impl Cli {
    fn config(&self) -> MachineConfig {
        let mut config = MachineConfig::for_stack(EVAL_STACK_BYTES).with_env();
        if let Some(n) = self.max_depth {
            config.max_depth = n;
        }
        if let Some(n) = self.heap_cells {
            config.heap_capacity = n;
        }
        if let Some(n) = self.trace_depth {
            config.trace_depth = n;
        }
        if self.trace {
            config.trace_eval = true;
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_env("CONDLISP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let handle = thread::Builder::new()
        .name("condlisp-eval".into())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || run(cli));
    let code = match handle.map(|h| h.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("evaluator thread panicked");
            101
        }
        Err(e) => {
            eprintln!("cannot start evaluator thread: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let mut machine = match Machine::new(cli.config()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to initialize machine: {}", e);
            return 1;
        }
    };

    for path in &cli.load {
        if let Err(code) = load_file(&mut machine, path) {
            return code;
        }
    }

    if let Some(src) = &cli.eval {
        return match machine.eval_str(src) {
            Ok(v) => {
                println!("{}", machine.write_string(v));
                0
            }
            Err(e) => report(&e),
        };
    }

    if io::stdin().is_terminal() {
        println!("condlisp {}", env!("CARGO_PKG_VERSION"));
        println!(
            "  Heap: {} cells used, Symbols: {} interned",
            machine.heap.total_cells(),
            machine.symbols.count()
        );
        println!("Ready.\n");
        run_interactive(&mut machine);
        0
    } else {
        run_piped(&mut machine)
    }
}

/// Print a Rust-level error and pick the exit status.
fn report(e: &EvalError) -> i32 {
    match e {
        EvalError::Unhandled { report, .. } => {
            eprintln!("Unhandled error condition!\n\n{}", report);
            condlisp::config::UNHANDLED_EXIT_CODE
        }
        other => {
            eprintln!("Error: {}", other);
            1
        }
    }
}

fn load_file(machine: &mut Machine, path: &Path) -> Result<(), i32> {
    let src = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error loading {}: {}", path.display(), e);
        1
    })?;
    tracing::debug!(path = %path.display(), "load");
    machine.eval_str(&src).map(|_| ()).map_err(|e| report(&e))
}

/// Interactive REPL: accumulate lines until the brackets balance. Unhandled
/// errors are reported and the session goes on.
fn run_interactive(machine: &mut Machine) {
    machine.config.unhandled = UnhandledPolicy::Return;
    let stdin = io::stdin();
    let mut buf = String::new();
    let mut depth: i32 = 0;

    loop {
        print!("{}", if depth == 0 { "> " } else { "  " });
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
        depth += bracket_balance(&line);
        buf.push_str(&line);

        if depth <= 0 {
            depth = 0;
            let input = std::mem::take(&mut buf);
            if !input.trim().is_empty() {
                eval_and_print(&input, machine);
            }
        }
    }
}

/// Net bracket depth of one line, ignoring strings and `;` comments.
fn bracket_balance(line: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for ch in line.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ';' => break,
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Piped mode: read all input, then evaluate and print one expression at a
/// time. An unhandled error ends the run.
fn run_piped(machine: &mut Machine) -> i32 {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("Read error: {}", e);
        return 1;
    }
    let mut pos = 0;
    loop {
        match machine.read_at(&input, pos) {
            Ok(Some((expr, next))) => {
                pos = next;
                match machine.eval_global(expr) {
                    Ok(v) => println!("{}", machine.write_string(v)),
                    Err(e) => return report(&e),
                }
            }
            Ok(None) => return 0,
            Err(e) => return report(&e),
        }
    }
}

fn eval_and_print(input: &str, machine: &mut Machine) {
    let mut pos = 0;
    loop {
        match machine.read_at(input, pos) {
            Ok(Some((expr, next))) => {
                pos = next;
                match machine.eval_global(expr) {
                    Ok(v) => println!("{}", machine.write_string(v)),
                    Err(e) => {
                        report(&e);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::bracket_balance;

    #[test]
    fn balance_ignores_strings_and_comments() {
        assert_eq!(bracket_balance("(define x \"(\""), 1);
        assert_eq!(bracket_balance("(f [a b]) ; (("), 0);
        assert_eq!(bracket_balance("\"a\\\"(\" )"), -1);
    }
}
