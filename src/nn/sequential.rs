use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::nn::{Layer, Loss, Parameter};
use crate::tensor::Tensor;

/// Everything a backward pass needs from a forward pass
///
/// `inputs[i]` is the tensor layer `i` received.
#[derive(Debug, Clone)]
pub struct Activations {
    pub inputs: Vec<Tensor>,
    pub output: Tensor,
}

/// An ordered stack of layers
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Sequential { layers }
    }

    /// Builder-style append
    pub fn push(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Run every layer, keeping each layer's input for the backward pass
    #[instrument(skip(self, input), fields(shape = ?input.shape(), layers = self.layers.len()))]
    pub fn forward(&self, input: &Tensor) -> Result<Activations> {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut current = input.clone();
        for layer in &self.layers {
            let next = layer.forward(&current)?;
            inputs.push(current);
            current = next;
        }
        Ok(Activations {
            inputs,
            output: current,
        })
    }

    /// Forward pass without keeping intermediate inputs
    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(input.clone(), |x, layer| layer.forward(&x))
    }

    /// Propagate `grad_output` from the last layer back to the input
    #[instrument(skip(self, activations, grad_output), fields(grad = ?grad_output.shape()))]
    pub fn backward(&mut self, activations: &Activations, grad_output: &Tensor) -> Result<Tensor> {
        if activations.inputs.len() != self.layers.len() {
            return Err(Error::ActivationMismatch {
                recorded: activations.inputs.len(),
                layers: self.layers.len(),
            });
        }
        self.layers
            .iter_mut()
            .zip(&activations.inputs)
            .rev()
            .try_fold(grad_output.clone(), |grad, (layer, input)| {
                layer.backward(input, &grad)
            })
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    /// Reject layer/loss pairings whose gradients would be silently wrong
    ///
    /// A layer that relies on a fused loss gradient must be the last layer
    /// and the loss must actually provide the fused gradient.
    pub fn check_loss(&self, loss: &dyn Loss) -> Result<()> {
        let last = self.layers.len().saturating_sub(1);
        for (position, layer) in self.layers.iter().enumerate() {
            if layer.requires_fused_loss() && (position != last || !loss.fuses_softmax()) {
                return Err(Error::UnfusedSoftmax {
                    position,
                    loss: loss.name(),
                });
            }
        }
        debug!(layers = ?self.layer_names(), loss = loss.name(), "loss pairing ok");
        Ok(())
    }
}
