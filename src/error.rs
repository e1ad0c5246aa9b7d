//! Error types shared by tensors, layers, losses and datasets
//!
//! Every check runs before any work is done, so a returned error means the
//! operation produced no partial result.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Two operands have shapes that violate the operation's contract
    #[error("{op}: shape mismatch {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: String,
        rhs: String,
    },

    /// The operand has a rank the operation does not support
    #[error("{op}: expected {expected}, got shape {shape}")]
    InvalidRank {
        op: &'static str,
        expected: &'static str,
        shape: String,
    },

    #[error("index {index:?} out of bounds for shape {shape}")]
    IndexOutOfBounds { index: Vec<usize>, shape: String },

    #[error("invalid shape {shape} for data of length {len}")]
    InvalidData { shape: String, len: usize },

    #[error("invalid uniform range [{lo}, {hi}]")]
    InvalidRange { lo: f32, hi: f32 },

    /// A weight update was requested before any gradient was accumulated
    #[error("{layer}: no gradient accumulated, call backward before updating")]
    MissingGradient { layer: &'static str },

    /// Softmax backward is only valid when fused with a cross-entropy loss
    #[error("softmax at layer {position} must be the final layer followed by a fused loss, got {loss}")]
    UnfusedSoftmax { position: usize, loss: &'static str },

    /// Backward was given activations from a different model
    #[error("activations recorded for {recorded} layers, model has {layers}")]
    ActivationMismatch { recorded: usize, layers: usize },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
        Error::ShapeMismatch {
            op,
            lhs: format!("{:?}", lhs),
            rhs: format!("{:?}", rhs),
        }
    }

    pub(crate) fn invalid_rank(op: &'static str, expected: &'static str, shape: &[usize]) -> Self {
        Error::InvalidRank {
            op,
            expected,
            shape: format!("{:?}", shape),
        }
    }
}
