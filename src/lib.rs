//! A small feedforward neural network library
//!
//! Immutable tensors, layers with hand-derived gradients, losses, plain SGD
//! and a per-example training loop. Layers do not build a graph: the
//! forward pass records each layer's input and the backward pass walks the
//! layers in reverse.

pub mod data;
pub mod error;
pub mod nn;
pub mod tensor;
pub mod train;

// Re-export commonly used types for convenience
pub use data::{Dataset, InMemoryDataset, MnistDataset};
pub use error::{Error, Result};
pub use nn::*;
pub use tensor::{Tensor, TensorMut};
pub use train::{evaluate, EpochStats, TrainConfig, Trainer};
