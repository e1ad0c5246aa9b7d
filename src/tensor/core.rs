use std::fmt;
use std::ops::{AddAssign, DivAssign, Mul, MulAssign, SubAssign};
use std::sync::Arc;

use rand::distributions::Uniform;
use rand::prelude::Distribution;
use rand::Rng;
use tracing::instrument;

use super::kernels;
use crate::error::{Error, Result};

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

fn shape_str(shape: &[usize]) -> String {
    format!("{:?}", shape)
}

/// Row-major offset of `index` within `shape`
fn flat_index(shape: &[usize], index: &[usize]) -> Result<usize> {
    if index.len() != shape.len() || index.iter().zip(shape).any(|(&i, &dim)| i >= dim) {
        return Err(Error::IndexOutOfBounds {
            index: index.to_vec(),
            shape: shape_str(shape),
        });
    }
    Ok(index
        .iter()
        .zip(shape)
        .fold(0, |offset, (&i, &dim)| offset * dim + i))
}

fn check_len(shape: &[usize], len: usize) -> Result<()> {
    if numel_of(shape) != len {
        return Err(Error::InvalidData {
            shape: shape_str(shape),
            len,
        });
    }
    Ok(())
}

fn matrix_dims(op: &'static str, shape: &[usize]) -> Result<[usize; 2]> {
    match shape {
        &[rows, cols] => Ok([rows, cols]),
        _ => Err(Error::invalid_rank(op, "a rank-2 tensor", shape)),
    }
}

/// Immutable tensor of `f32` values in row-major order
///
/// Cloning is cheap: clones share the same buffer. Nothing can write to a
/// buffer while it is shared, so a published tensor never changes under a
/// reader.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Arc<Vec<f32>>,
}

/// Exclusively owned tensor under construction
///
/// Layers and losses build their outputs here and then `freeze` them into a
/// [`Tensor`], which moves the buffer without copying.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorMut {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor from a shape and row-major values
    #[instrument(skip(data), fields(shape = ?shape, len = data.len()))]
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        check_len(&shape, data.len())?;
        Ok(Tensor {
            shape,
            data: Arc::new(data),
        })
    }

    /// Rank-0 tensor holding a single value
    pub fn scalar(value: f32) -> Self {
        Tensor {
            shape: Vec::new(),
            data: Arc::new(vec![value]),
        }
    }

    #[instrument(fields(numel = numel_of(&shape)))]
    pub fn zeros(shape: Vec<usize>) -> Self {
        TensorMut::zeros(shape).freeze()
    }

    /// Tensor with every element drawn independently from `U[lo, hi]`
    pub fn random_uniform(shape: Vec<usize>, lo: f32, hi: f32) -> Result<Self> {
        Self::random_uniform_with(shape, lo, hi, &mut rand::thread_rng())
    }

    /// Same as [`Tensor::random_uniform`] with a caller-provided generator
    #[instrument(skip(rng), fields(numel = numel_of(&shape)))]
    pub fn random_uniform_with<R: Rng + ?Sized>(
        shape: Vec<usize>,
        lo: f32,
        hi: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
            return Err(Error::InvalidRange { lo, hi });
        }
        let uniform = Uniform::new_inclusive(lo, hi);
        let data = (0..numel_of(&shape)).map(|_| uniform.sample(rng)).collect();
        Ok(Tensor {
            shape,
            data: Arc::new(data),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Shape formatted for messages, e.g. `[2, 3]`
    pub fn shape_str(&self) -> String {
        shape_str(&self.shape)
    }

    /// Read the element at a multi-index
    pub fn at(&self, index: &[usize]) -> Result<f32> {
        Ok(self.data[flat_index(&self.shape, index)?])
    }

    /// Borrow row `i` of a rank-2 tensor
    pub fn row(&self, i: usize) -> Result<&[f32]> {
        let [rows, cols] = matrix_dims("row", &self.shape)?;
        if i >= rows {
            return Err(Error::IndexOutOfBounds {
                index: vec![i],
                shape: self.shape_str(),
            });
        }
        Ok(&self.data[i * cols..(i + 1) * cols])
    }

    /// Copy into a new mutable tensor
    pub fn to_mutable(&self) -> TensorMut {
        TensorMut {
            shape: self.shape.clone(),
            data: self.data.as_ref().clone(),
        }
    }

    /// Writable view of the buffer, copying it first if it is shared
    ///
    /// Only parameters use this, for the in-place gradient step.
    pub(crate) fn make_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            shape: self.shape.clone(),
            data: Arc::new(self.data.iter().map(|&x| f(x)).collect()),
        }
    }

    /// Combine two same-shaped tensors element by element
    pub fn zip_map<F>(&self, other: &Tensor, op: &'static str, f: F) -> Result<Tensor>
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(op, &self.shape, &other.shape));
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Tensor {
            shape: self.shape.clone(),
            data: Arc::new(data),
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "div", |a, b| a / b)
    }

    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x + scalar)
    }

    pub fn sub_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x - scalar)
    }

    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    pub fn div_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x / scalar)
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Largest element, or negative infinity for an empty tensor
    pub fn max_val(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Flat index of the largest element (first one on ties)
    ///
    /// For a `[1, N]` prediction this is the predicted class.
    pub fn max_idx(&self) -> usize {
        argmax(&self.data)
    }

    /// Column index of the largest element in each row of a rank-2 tensor
    pub fn argmax_rows(&self) -> Result<Vec<usize>> {
        let [rows, cols] = matrix_dims("argmax_rows", &self.shape)?;
        Ok((0..rows)
            .map(|i| argmax(&self.data[i * cols..(i + 1) * cols]))
            .collect())
    }

    pub fn transpose(&self) -> Result<Tensor> {
        let [rows, cols] = matrix_dims("transpose", &self.shape)?;
        let mut data = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = self.data[i * cols + j];
            }
        }
        Ok(Tensor {
            shape: vec![cols, rows],
            data: Arc::new(data),
        })
    }

    /// Matrix product `self @ other`, [m, k] @ [k, n] -> [m, n]
    #[instrument(skip(self, other), fields(lhs = ?self.shape, rhs = ?other.shape))]
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let a = matrix_dims("matmul", &self.shape)?;
        let b = matrix_dims("matmul", &other.shape)?;
        if a[1] != b[0] {
            return Err(Error::shape_mismatch("matmul", &self.shape, &other.shape));
        }
        let data = kernels::matmul(&self.data, a, &other.data, b);
        Ok(Tensor {
            shape: vec![a[0], b[1]],
            data: Arc::new(data),
        })
    }

    /// `self @ other^T`, [m, k] @ [n, k]^T -> [m, n]
    #[instrument(skip(self, other), fields(lhs = ?self.shape, rhs = ?other.shape))]
    pub fn matmul_transpose_right(&self, other: &Tensor) -> Result<Tensor> {
        let a = matrix_dims("matmul_transpose_right", &self.shape)?;
        let b = matrix_dims("matmul_transpose_right", &other.shape)?;
        if a[1] != b[1] {
            return Err(Error::shape_mismatch(
                "matmul_transpose_right",
                &self.shape,
                &other.shape,
            ));
        }
        let data = kernels::matmul_transpose_right(&self.data, a, &other.data, b);
        Ok(Tensor {
            shape: vec![a[0], b[0]],
            data: Arc::new(data),
        })
    }

    /// `out += self^T @ other`, [k, m]^T @ [k, n] -> [m, n]
    #[instrument(skip(self, other, out), fields(lhs = ?self.shape, rhs = ?other.shape))]
    pub fn transpose_matmul_into(&self, other: &Tensor, out: &mut TensorMut) -> Result<()> {
        let a = matrix_dims("transpose_matmul", &self.shape)?;
        let b = matrix_dims("transpose_matmul", &other.shape)?;
        if a[0] != b[0] {
            return Err(Error::shape_mismatch(
                "transpose_matmul",
                &self.shape,
                &other.shape,
            ));
        }
        if out.shape != [a[1], b[1]] {
            return Err(Error::shape_mismatch(
                "transpose_matmul",
                &out.shape,
                &[a[1], b[1]],
            ));
        }
        kernels::matmul_transpose_left_into(&self.data, a, &other.data, b, &mut out.data);
        Ok(())
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val {
                (i, v)
            } else {
                (best, best_val)
            }
        })
        .0
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{} ", self.shape_str())?;
        match self.shape.as_slice() {
            &[_, cols] if cols > 0 => {
                write!(f, "[")?;
                for (i, row) in self.data.chunks(cols).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", row)?;
                }
                write!(f, "]")
            }
            _ => write!(f, "{:?}", self.data.as_slice()),
        }
    }
}

impl TensorMut {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        check_len(&shape, data.len())?;
        Ok(TensorMut { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let data = vec![0.0; numel_of(&shape)];
        TensorMut { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn at(&self, index: &[usize]) -> Result<f32> {
        Ok(self.data[flat_index(&self.shape, index)?])
    }

    /// Write the element at a multi-index
    pub fn set_at(&mut self, index: &[usize], value: f32) -> Result<()> {
        let offset = flat_index(&self.shape, index)?;
        self.data[offset] = value;
        Ok(())
    }

    /// Publish as an immutable tensor, moving the buffer
    pub fn freeze(self) -> Tensor {
        Tensor {
            shape: self.shape,
            data: Arc::new(self.data),
        }
    }
}

impl From<TensorMut> for Tensor {
    fn from(t: TensorMut) -> Self {
        t.freeze()
    }
}

impl AddAssign<f32> for TensorMut {
    fn add_assign(&mut self, rhs: f32) {
        self.data.iter_mut().for_each(|x| *x += rhs);
    }
}

impl SubAssign<f32> for TensorMut {
    fn sub_assign(&mut self, rhs: f32) {
        self.data.iter_mut().for_each(|x| *x -= rhs);
    }
}

impl MulAssign<f32> for TensorMut {
    fn mul_assign(&mut self, rhs: f32) {
        self.data.iter_mut().for_each(|x| *x *= rhs);
    }
}

impl DivAssign<f32> for TensorMut {
    fn div_assign(&mut self, rhs: f32) {
        self.data.iter_mut().for_each(|x| *x /= rhs);
    }
}

/// Allows: &tensor * scalar
impl Mul<f32> for &Tensor {
    type Output = Tensor;

    fn mul(self, scalar: f32) -> Self::Output {
        self.mul_scalar(scalar)
    }
}

/// Allows: scalar * &tensor
impl Mul<&Tensor> for f32 {
    type Output = Tensor;

    fn mul(self, tensor: &Tensor) -> Self::Output {
        tensor.mul_scalar(self)
    }
}
