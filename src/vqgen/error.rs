//! Error taxonomy shared by every model component.
//!
//! Every variant is fatal for the call that produced it: nothing inside the
//! model retries, and callers are expected to treat these as programming,
//! configuration or data-pipeline faults.

use std::fmt::Debug;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Bad dimension, divisibility or range detected at construction time.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Input tensors are inconsistent in batch, length or feature dimension.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// A token or target index lies outside `[0, bound)`.
    #[error("index {index} out of range [0, {bound}) in {context}")]
    IndexOutOfRange {
        context: &'static str,
        index: i64,
        bound: usize,
    },

    /// The tokenizer was asked to encode a character outside its alphabet.
    #[error("unknown symbol {0:?}")]
    UnknownSymbol(char),

    /// A numerical invariant did not hold (fully masked attention row, non-finite loss).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Generation was aborted between two decoding steps.
    #[error("generation cancelled after {completed_steps} steps")]
    Cancelled { completed_steps: usize },

    /// Tensor contents could not be read back to the host.
    #[error("tensor data error: {0}")]
    TensorData(String),
}

impl ModelError {
    pub fn shape(context: &'static str, expected: impl Debug, actual: impl Debug) -> Self {
        Self::ShapeMismatch {
            context,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
