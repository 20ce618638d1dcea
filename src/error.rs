use crate::value::Value;

/// Errors that unwind native frames.
///
/// Language-level failures (unbound variables, arity, type mismatches, user
/// `error` calls) are conditions and travel through the handler stack. Only
/// what must leave Rust frames shows up here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// An `error`-class condition reached the bottom of the handler stack and
    /// the machine is configured to return instead of terminating.
    #[error("unhandled {type_name} condition\n{report}")]
    Unhandled { type_name: String, report: String },

    /// Non-local exit towards the `call/ec` frame that created escape `id`.
    #[error("escape continuation {id} unwinding")]
    Escape { id: u64, value: Value },

    /// Reader error.
    #[error("read error: {0}")]
    Read(String),

    /// Heap capacity exceeded.
    #[error("heap capacity exceeded")]
    HeapOverflow,

    /// Internal interpreter error (should not happen in correct code).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn internal(msg: impl Into<String>) -> Self {
        EvalError::Internal(msg.into())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
