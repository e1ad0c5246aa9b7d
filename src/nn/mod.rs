//! Layers, losses and the gradient-descent step
//!
//! Every layer and loss carries its own hand-derived gradient. The caller
//! runs the forward pass, keeps each layer's input, and hands those inputs
//! back during the backward pass in reverse order.

use crate::error::Result;
use crate::Tensor;

/// A differentiable transformation over `[batch, features]` tensors
pub trait Layer {
    /// Map an input batch to an output batch
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Map the gradient w.r.t. this layer's output to the gradient w.r.t.
    /// its input. `input` must be the tensor `forward` was called with.
    ///
    /// Layers with parameters also accumulate their parameter gradients here.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor>;

    /// Learnable parameters, empty for stateless layers
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    /// Whether `backward` is only correct when followed by a loss whose
    /// gradient already includes this layer's Jacobian
    fn requires_fused_loss(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// A scalar error between a prediction and a target
pub trait Loss {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<f32>;

    /// Gradient w.r.t. the prediction, same shape as the prediction
    fn backward(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor>;

    /// Whether `backward` returns the combined softmax + loss gradient
    fn fuses_softmax(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

pub mod activation;
pub mod linear;
pub mod loss;
pub mod optim;
pub mod sequential;

pub use activation::{ReLU, Softmax};
pub use linear::Linear;
pub use loss::{CrossEntropyLoss, MeanSquaredErrorLoss, SquaredErrorLoss};
pub use optim::{Parameter, Sgd};
pub use sequential::{Activations, Sequential};
