//! Matrix kernels used by the dense layers
//!
//! All kernels work on flat row-major `f32` buffers. Shapes are validated by
//! the `Tensor` methods that call into here, so the kernels only assert their
//! buffer sizes.

/// Arguments to the core GEMM routine
///
/// Computes: C += alpha * op(A) @ op(B)
/// where op(X) is either X or X^T depending on the transpose flag.
/// Shapes are the stored (untransposed) shapes of A and B.
pub(crate) struct GemmParams<'a> {
    pub a_data: &'a [f32],
    pub a_shape: [usize; 2],
    pub transpose_left: bool,
    pub b_data: &'a [f32],
    pub b_shape: [usize; 2],
    pub transpose_right: bool,
    pub c_data: &'a mut [f32],
    pub alpha: f32,
}

pub mod cpu_gemm;

pub use cpu_gemm::{matmul, matmul_transpose_left_into, matmul_transpose_right};
