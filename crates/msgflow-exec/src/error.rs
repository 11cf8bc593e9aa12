//! Errors raised while scheduling message passing and propagation.
//!
//! Storage-level failures (bad ids, shape or device mismatches, missing
//! fields) come from the core crate and are wrapped transparently. The
//! remaining variants belong to the engine itself.

use msgflow_core::CoreError;

/// Errors produced by the execution engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("cycle detected: {unresolved} node(s) never reached in-degree zero")]
    CycleDetected { unresolved: usize },

    #[error("unknown built-in combinator '{name}'")]
    UnknownBuiltin { name: String },

    #[error("message field '{message_out}' does not feed reduce input '{reduce_in}'")]
    InvalidFunctionPair {
        message_out: String,
        reduce_in: String,
    },

    #[error("user function failed: {message}")]
    UserFunction { message: String },
}

impl ExecError {
    /// Wraps a failure reported by a user-supplied function.
    pub fn user(message: impl Into<String>) -> Self {
        ExecError::UserFunction {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgflow_core::IndexKind;

    #[test]
    fn core_errors_display_transparently() {
        let err: ExecError = CoreError::index(IndexKind::Node, 7, 3).into();
        assert_eq!(err.to_string(), "invalid node index 7 (bound 3)");
    }

    #[test]
    fn cycle_message_names_unresolved_count() {
        let err = ExecError::CycleDetected { unresolved: 2 };
        assert!(err.to_string().contains("2 node(s)"));
    }
}
