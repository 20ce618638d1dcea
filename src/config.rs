use std::env;

/// What happens when an `error`-class condition finds no handler that
/// leaves its dynamic extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhandledPolicy {
    /// Print the report and the stack trace to stderr, then exit the process.
    Terminate,
    /// Hand `EvalError::Unhandled` back to whoever called into the machine.
    Return,
}

/// Exit status used by `UnhandledPolicy::Terminate`.
pub const UNHANDLED_EXIT_CODE: i32 = 70;

/// Native stack one nested evaluation may use, with room for primitives
/// that call back into the evaluator.
const STACK_BYTES_PER_DEPTH: usize = 8 * 1024;

/// Depth limits never go below this, however small the stack.
const MIN_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Combined capacity of the pair and object arenas.
    pub heap_capacity: usize,
    /// Bound on nested (non-tail) evaluations. Tail calls do not count.
    pub max_depth: usize,
    /// Trace buffer size, rounded up to a power of two.
    pub trace_depth: usize,
    /// Allocations between collections.
    pub gc_threshold: usize,
    pub unhandled: UnhandledPolicy,
    /// Log every evaluator step at `trace` level.
    pub trace_eval: bool,
}

/// The default depth limit suits the 2 MiB stack of a spawned thread.
/// Callers that control their stack size should use
/// `MachineConfig::for_stack`.
impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            heap_capacity: 10_000_000,
            max_depth: 400,
            trace_depth: 32,
            gc_threshold: 100_000,
            unhandled: UnhandledPolicy::Terminate,
            trace_eval: false,
        }
    }
}

impl MachineConfig {
    /// Defaults with the depth limit sized for a thread of `stack_bytes`.
    pub fn for_stack(stack_bytes: usize) -> Self {
        MachineConfig {
            max_depth: (stack_bytes / STACK_BYTES_PER_DEPTH).max(MIN_DEPTH),
            ..MachineConfig::default()
        }
    }

    /// Defaults overridden by the environment. See `with_env`.
    pub fn from_env() -> Self {
        MachineConfig::default().with_env()
    }

    /// Override with `CONDLISP_MAX_DEPTH`, `CONDLISP_HEAP_CELLS` and
    /// `CONDLISP_TRACE`. Unparsable values are ignored.
    pub fn with_env(self) -> Self {
        let mut config = self;
        if let Some(n) = env_usize("CONDLISP_MAX_DEPTH") {
            config.max_depth = n;
        }
        if let Some(n) = env_usize("CONDLISP_HEAP_CELLS") {
            config.heap_capacity = n;
        }
        if let Ok(v) = env::var("CONDLISP_TRACE") {
            config.trace_eval = v == "1" || v.eq_ignore_ascii_case("true");
        }
        config
    }

    pub fn with_policy(mut self, policy: UnhandledPolicy) -> Self {
        self.unhandled = policy;
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    match env::var(key) {
        Ok(v) => match v.trim().parse() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!("ignoring {}={:?}: not a number", key, v);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_limit_follows_the_stack_size() {
        assert_eq!(MachineConfig::for_stack(256 * 1024 * 1024).max_depth, 32 * 1024);
        assert_eq!(MachineConfig::for_stack(8 * 1024 * 1024).max_depth, 1024);
        assert_eq!(MachineConfig::for_stack(0).max_depth, MIN_DEPTH);
        let config = MachineConfig::for_stack(64 * 1024 * 1024);
        assert_eq!(config.heap_capacity, MachineConfig::default().heap_capacity);
        assert_eq!(config.unhandled, UnhandledPolicy::Terminate);
    }
}
