use tracing::instrument;

use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorMut};

/// A learnable tensor and the gradient accumulated for it since the last step
#[derive(Debug, Clone)]
pub struct Parameter {
    value: Tensor,
    grad: Option<TensorMut>,
}

impl Parameter {
    pub fn new(value: Tensor) -> Self {
        Parameter { value, grad: None }
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Accumulated gradient, if any backward pass ran since the last step
    pub fn grad(&self) -> Option<&TensorMut> {
        self.grad.as_ref()
    }

    /// Gradient buffer to accumulate into, zero-initialized on first use
    pub fn grad_mut(&mut self) -> &mut TensorMut {
        let shape = self.value.shape().to_vec();
        self.grad.get_or_insert_with(|| TensorMut::zeros(shape))
    }

    /// grad += delta
    pub fn accumulate_grad(&mut self, delta: &Tensor) -> Result<()> {
        if delta.shape() != self.value.shape() {
            return Err(Error::shape_mismatch(
                "Parameter::accumulate_grad",
                self.value.shape(),
                delta.shape(),
            ));
        }
        self.grad_mut()
            .data_mut()
            .iter_mut()
            .zip(delta.data())
            .for_each(|(g, d)| *g += d);
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// value <- value - learning_rate * grad, then clear the gradient
    ///
    /// The update happens in place unless a published clone of the value is
    /// still alive, in which case the value is copied first.
    pub fn apply_gradient(&mut self, learning_rate: f32, owner: &'static str) -> Result<()> {
        let grad = self
            .grad
            .take()
            .ok_or(Error::MissingGradient { layer: owner })?;
        self.value
            .make_mut()
            .iter_mut()
            .zip(grad.data())
            .for_each(|(p, g)| *p -= learning_rate * g);
        Ok(())
    }
}

/// Stochastic Gradient Descent optimizer
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    pub learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }

    /// Update parameters using their gradients
    /// Formula: param = param - learning_rate * grad
    #[instrument(skip(self, parameters), fields(num_params = parameters.len(), lr = self.learning_rate))]
    pub fn step(&self, parameters: &mut [&mut Parameter]) -> Result<()> {
        parameters
            .iter_mut()
            .try_for_each(|param| param.apply_gradient(self.learning_rate, "sgd"))
    }

    #[instrument(skip(self, parameters), fields(num_params = parameters.len()))]
    pub fn zero_grad(&self, parameters: &mut [&mut Parameter]) {
        parameters.iter_mut().for_each(|param| param.zero_grad());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_with_grad(value: Vec<f32>, grad: Vec<f32>) -> Parameter {
        let n = value.len();
        let mut p = Parameter::new(Tensor::new(vec![n], value).unwrap());
        p.grad_mut().data_mut().copy_from_slice(&grad);
        p
    }

    #[test]
    fn test_sgd_step() {
        let mut p = param_with_grad(vec![1.0, 2.0], vec![0.5, -1.0]);
        let sgd = Sgd::new(0.1);
        sgd.step(&mut [&mut p]).unwrap();
        let v = p.value().data();
        assert!((v[0] - 0.95).abs() < 1e-6);
        assert!((v[1] - 2.1).abs() < 1e-6);
        assert!(p.grad().is_none());
    }

    #[test]
    fn test_step_without_gradient_fails() {
        let mut p = Parameter::new(Tensor::zeros(vec![2]));
        let err = Sgd::new(0.1).step(&mut [&mut p]).unwrap_err();
        assert!(matches!(err, Error::MissingGradient { .. }));
    }

    #[test]
    fn test_update_does_not_touch_published_value() {
        let mut p = param_with_grad(vec![1.0, 1.0], vec![1.0, 1.0]);
        let snapshot = p.value().clone();
        p.apply_gradient(0.5, "test").unwrap();
        assert_eq!(snapshot.data(), &[1.0, 1.0]);
        assert_eq!(p.value().data(), &[0.5, 0.5]);
    }

    #[test]
    fn test_accumulate_grad_sums() {
        let mut p = Parameter::new(Tensor::zeros(vec![2]));
        let delta = Tensor::new(vec![2], vec![1.0, -2.0]).unwrap();
        p.accumulate_grad(&delta).unwrap();
        p.accumulate_grad(&delta).unwrap();
        assert_eq!(p.grad().unwrap().data(), &[2.0, -4.0]);
        assert!(p.accumulate_grad(&Tensor::zeros(vec![3])).is_err());
    }

    #[test]
    fn test_zero_grad() {
        let mut p = param_with_grad(vec![1.0], vec![2.0]);
        Sgd::new(0.1).zero_grad(&mut [&mut p]);
        assert!(p.grad().is_none());
    }
}
