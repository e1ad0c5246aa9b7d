//! Parameter-free layers

use tracing::instrument;

use crate::error::{Error, Result};
use crate::nn::Layer;
use crate::tensor::{Tensor, TensorMut};

/// Rectified linear unit: max(0, x)
#[derive(Debug, Default, Clone, Copy)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Layer for ReLU {
    #[instrument(skip(self, input), fields(shape = ?input.shape()))]
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.map(|x| x.max(0.0)))
    }

    /// Pass the gradient through where the input was positive
    #[instrument(skip(self, input, grad_output), fields(shape = ?input.shape()))]
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        input.zip_map(grad_output, "ReLU::backward", |x, g| if x > 0.0 { g } else { 0.0 })
    }

    fn name(&self) -> &'static str {
        "ReLU"
    }
}

/// Row-wise softmax over `[batch, classes]`
///
/// `backward` is the identity: it returns the upstream gradient unchanged.
/// That is only correct when the next step is a loss that already returns
/// the combined softmax + loss gradient, such as [`CrossEntropyLoss`].
/// [`Sequential::check_loss`] enforces this pairing.
///
/// [`CrossEntropyLoss`]: crate::nn::CrossEntropyLoss
/// [`Sequential::check_loss`]: crate::nn::Sequential::check_loss
#[derive(Debug, Default, Clone, Copy)]
pub struct Softmax;

impl Softmax {
    pub fn new() -> Self {
        Softmax
    }
}

impl Layer for Softmax {
    #[instrument(skip(self, input), fields(shape = ?input.shape()))]
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (rows, cols) = match input.shape() {
            [] => return Ok(input.clone()),
            &[rows, cols] => (rows, cols),
            other => {
                return Err(Error::invalid_rank(
                    "Softmax::forward",
                    "a rank-0 or rank-2 tensor",
                    other,
                ))
            }
        };

        let mut output = TensorMut::zeros(vec![rows, cols]);
        for (x_row, y_row) in input
            .data()
            .chunks(cols.max(1))
            .zip(output.data_mut().chunks_mut(cols.max(1)))
        {
            // shift by the row max so the largest exponent is exp(0)
            let max = x_row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (y, &x) in y_row.iter_mut().zip(x_row) {
                *y = (x - max).exp();
                sum += *y;
            }
            y_row.iter_mut().for_each(|y| *y /= sum);
        }
        Ok(output.freeze())
    }

    fn backward(&mut self, _input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        Ok(grad_output.clone())
    }

    fn requires_fused_loss(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Softmax"
    }
}
