use tracing::instrument;

use crate::error::{Error, Result};
use crate::nn::Loss;
use crate::tensor::Tensor;

fn same_shape(op: &'static str, prediction: &Tensor, target: &Tensor) -> Result<()> {
    if prediction.shape() != target.shape() {
        return Err(Error::shape_mismatch(op, prediction.shape(), target.shape()));
    }
    Ok(())
}

/// Both tensors must be `[batch, classes]` with identical shape and
/// `batch >= 1`; returns batch
fn batch_pair(op: &'static str, prediction: &Tensor, target: &Tensor) -> Result<usize> {
    if prediction.rank() != 2 || target.rank() != 2 {
        return Err(Error::shape_mismatch(op, prediction.shape(), target.shape()));
    }
    same_shape(op, prediction, target)?;
    match prediction.shape()[0] {
        0 => Err(Error::invalid_rank(op, "a non-empty batch", prediction.shape())),
        batch => Ok(batch),
    }
}

/// Element-wise binary cross-entropy averaged over the batch
///
/// L = -(1/B) * sum(y * ln(yhat) + (1 - y) * ln(1 - yhat))
///
/// Predictions are not clamped, so a prediction of exactly 0 or 1 where the
/// target disagrees gives an infinite loss.
///
/// `backward` returns `(yhat - y) / B` for one-hot targets, which is the
/// gradient of softmax followed by this loss w.r.t. the softmax *input*.
/// Pair it with a final [`Softmax`](crate::nn::Softmax) layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        CrossEntropyLoss
    }
}

impl Loss for CrossEntropyLoss {
    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<f32> {
        let batch = batch_pair("CrossEntropyLoss::forward", prediction, target)?;
        let total: f32 = prediction
            .data()
            .iter()
            .zip(target.data())
            .map(|(&yhat, &y)| y * yhat.ln() + (1.0 - y) * (1.0 - yhat).ln())
            .sum();
        Ok(-total / batch as f32)
    }

    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn backward(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        let batch = batch_pair("CrossEntropyLoss::backward", prediction, target)? as f32;
        prediction.zip_map(target, "CrossEntropyLoss::backward", |yhat, y| {
            let grad = if y == 1.0 { yhat - 1.0 } else { yhat };
            grad / batch
        })
    }

    fn fuses_softmax(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "CrossEntropyLoss"
    }
}

/// Sum of squared errors: L = sum((yhat - y)^2)
///
/// Accepts any shape, including rank-0 scalars, as long as both match.
#[derive(Debug, Default, Clone, Copy)]
pub struct SquaredErrorLoss;

impl SquaredErrorLoss {
    pub fn new() -> Self {
        SquaredErrorLoss
    }
}

impl Loss for SquaredErrorLoss {
    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<f32> {
        same_shape("SquaredErrorLoss::forward", prediction, target)?;
        Ok(squared_error_sum(prediction, target))
    }

    /// 2 * (yhat - y)
    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn backward(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        prediction.zip_map(target, "SquaredErrorLoss::backward", |yhat, y| {
            2.0 * (yhat - y)
        })
    }

    fn name(&self) -> &'static str {
        "SquaredErrorLoss"
    }
}

/// Mean squared error over every element: L = (1/n) * sum((yhat - y)^2)
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredErrorLoss;

impl MeanSquaredErrorLoss {
    pub fn new() -> Self {
        MeanSquaredErrorLoss
    }
}

impl Loss for MeanSquaredErrorLoss {
    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<f32> {
        same_shape("MeanSquaredErrorLoss::forward", prediction, target)?;
        Ok(squared_error_sum(prediction, target) / prediction.numel().max(1) as f32)
    }

    /// 2 * (yhat - y) / n
    #[instrument(skip(self, prediction, target), fields(shape = ?prediction.shape()))]
    fn backward(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        let n = prediction.numel().max(1) as f32;
        prediction.zip_map(target, "MeanSquaredErrorLoss::backward", |yhat, y| {
            2.0 * (yhat - y) / n
        })
    }

    fn name(&self) -> &'static str {
        "MeanSquaredErrorLoss"
    }
}

fn squared_error_sum(prediction: &Tensor, target: &Tensor) -> f32 {
    prediction
        .data()
        .iter()
        .zip(target.data())
        .map(|(&yhat, &y)| (yhat - y) * (yhat - y))
        .sum()
}
