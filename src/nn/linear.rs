use tracing::instrument;

use crate::error::{Error, Result};
use crate::nn::{Layer, Parameter};
use crate::tensor::Tensor;

/// Linear (fully-connected) layer without bias: y = xW
pub struct Linear {
    pub weight: Parameter,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Wrap an existing `[in_features, out_features]` weight tensor
    pub fn new(weight: Tensor) -> Result<Self> {
        let (in_features, out_features) = match weight.shape() {
            &[i, o] => (i, o),
            other => return Err(Error::invalid_rank("Linear::new", "a rank-2 weight", other)),
        };
        Ok(Linear {
            weight: Parameter::new(weight),
            in_features,
            out_features,
        })
    }

    /// Weights drawn uniformly from `[-scale, scale]`
    pub fn uniform(in_features: usize, out_features: usize, scale: f32) -> Result<Self> {
        Self::new(Tensor::random_uniform(
            vec![in_features, out_features],
            -scale,
            scale,
        )?)
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// W <- W - learning_rate * dW
    pub fn update_weights(&mut self, learning_rate: f32) -> Result<()> {
        self.weight.apply_gradient(learning_rate, "Linear")
    }
}

impl Layer for Linear {
    /// [B, in] @ [in, out] -> [B, out]
    #[instrument(skip(self, input), fields(input = ?input.shape(), weight = ?self.weight.value().shape()))]
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        input.matmul(self.weight.value())
    }

    /// dX = dY @ W^T, and dW += X^T @ dY
    #[instrument(skip(self, input, grad_output), fields(input = ?input.shape(), grad = ?grad_output.shape()))]
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let batch_ok = input.rank() == 2
            && grad_output.rank() == 2
            && input.shape()[0] == grad_output.shape()[0];
        if !batch_ok
            || input.shape()[1] != self.in_features
            || grad_output.shape()[1] != self.out_features
        {
            return Err(Error::shape_mismatch(
                "Linear::backward",
                input.shape(),
                grad_output.shape(),
            ));
        }
        let grad_input = grad_output.matmul_transpose_right(self.weight.value())?;
        input.transpose_matmul_into(grad_output, self.weight.grad_mut())?;
        Ok(grad_input)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight]
    }

    fn name(&self) -> &'static str {
        "Linear"
    }
}
