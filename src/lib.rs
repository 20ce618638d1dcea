//! Evaluation core of a small Lisp: a trampolined eval/apply engine over an
//! arena heap, lexical frames, native forms and macros dispatched by value
//! tag, and a condition system with dynamically scoped handlers, restarts
//! and one-shot escape continuations.
//!
//! ```no_run
//! use condlisp::{Machine, MachineConfig};
//!
//! let mut m = Machine::new(MachineConfig::default()).unwrap();
//! let v = m.eval_str("(let loop ((n 10)) (if (= n 0) 'done (loop (- n 1))))").unwrap();
//! assert_eq!(m.write_string(v), "done");
//! ```

pub mod builtins;
pub mod condition;
pub mod config;
pub mod context;
pub mod env;
pub mod equal;
pub mod error;
pub mod eval;
pub mod forms;
pub mod heap;
pub mod object;
pub mod printer;
pub mod reader;
pub mod symbol;
pub mod table;
pub mod value;

pub use config::{MachineConfig, UnhandledPolicy};
pub use error::{EvalError, EvalResult};
pub use eval::{Arity, Machine, Outcome, TailEscape};
pub use value::Value;
