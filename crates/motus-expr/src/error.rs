use thiserror::Error;

/// Errors raised while compiling or evaluating expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("Symbol '{0}' is not bound to a parameter")]
    UnboundSymbol(String),

    #[error("Argument count mismatch: expected {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("Output length mismatch: expected {expected}, got {got}")]
    OutputLength { expected: usize, got: usize },

    #[error("Output index {index} out of range for length {len}")]
    OutputIndex { index: usize, len: usize },
}
