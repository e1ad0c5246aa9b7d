//! Tensor module containing the tensor types and matrix kernels
//!
//! [`Tensor`] is the immutable value passed between layers and losses;
//! [`TensorMut`] is the owned buffer a result is built in before it is
//! published.

mod core;
pub mod kernels;

pub use self::core::{Tensor, TensorMut};
