use crate::tensor::kernels::GemmParams;

/// Effective [rows, cols] of op(X)
fn op_dims(shape: [usize; 2], transposed: bool) -> (usize, usize) {
    if transposed {
        (shape[1], shape[0])
    } else {
        (shape[0], shape[1])
    }
}

/// Row and column strides of op(X) in row-major storage
fn op_strides(shape: [usize; 2], transposed: bool) -> (usize, usize) {
    if transposed {
        (1, shape[1])
    } else {
        (shape[1], 1)
    }
}

pub(crate) fn gemm_core(params: GemmParams) {
    let GemmParams {
        a_data,
        a_shape,
        transpose_left,
        b_data,
        b_shape,
        transpose_right,
        c_data,
        alpha,
    } = params;

    let (m, k) = op_dims(a_shape, transpose_left);
    let (k_b, n) = op_dims(b_shape, transpose_right);

    assert_eq!(k, k_b, "Inner dimension mismatch: {} != {}", k, k_b);
    assert_eq!(c_data.len(), m * n, "Output buffer size mismatch");

    let (a_row_stride, a_col_stride) = op_strides(a_shape, transpose_left);
    let (b_row_stride, b_col_stride) = op_strides(b_shape, transpose_right);

    // i-p-j order: the inner loop walks a row of C and, when B is not
    // transposed, a row of B
    for i in 0..m {
        let c_row = &mut c_data[i * n..(i + 1) * n];
        for p in 0..k {
            let a_val = alpha * a_data[i * a_row_stride + p * a_col_stride];
            if a_val == 0.0 {
                continue;
            }
            let b_base = p * b_row_stride;
            for (j, c) in c_row.iter_mut().enumerate() {
                *c += a_val * b_data[b_base + j * b_col_stride];
            }
        }
    }
}

/// C = A @ B for A: [m, k], B: [k, n]
///
/// Used by the linear layer forward pass, Y = X @ W.
pub fn matmul(a_data: &[f32], a_shape: [usize; 2], b_data: &[f32], b_shape: [usize; 2]) -> Vec<f32> {
    let mut result = vec![0.0; a_shape[0] * b_shape[1]];

    gemm_core(GemmParams {
        a_data,
        a_shape,
        transpose_left: false,
        b_data,
        b_shape,
        transpose_right: false,
        c_data: &mut result,
        alpha: 1.0,
    });

    result
}

/// C = A @ B^T for A: [m, k], B: [n, k]
///
/// Used for the input gradient of a linear layer, dX = dY @ W^T.
pub fn matmul_transpose_right(
    a_data: &[f32],
    a_shape: [usize; 2],
    b_data: &[f32],
    b_shape: [usize; 2],
) -> Vec<f32> {
    let mut result = vec![0.0; a_shape[0] * b_shape[0]];

    gemm_core(GemmParams {
        a_data,
        a_shape,
        transpose_left: false,
        b_data,
        b_shape,
        transpose_right: true,
        c_data: &mut result,
        alpha: 1.0,
    });

    result
}

/// C += A^T @ B for A: [k, m], B: [k, n], C: [m, n]
///
/// Accumulates into `c_data`, which is how a linear layer sums its weight
/// gradient dW += X^T @ dY across backward calls.
pub fn matmul_transpose_left_into(
    a_data: &[f32],
    a_shape: [usize; 2],
    b_data: &[f32],
    b_shape: [usize; 2],
    c_data: &mut [f32],
) {
    gemm_core(GemmParams {
        a_data,
        a_shape,
        transpose_left: true,
        b_data,
        b_shape,
        transpose_right: false,
        c_data,
        alpha: 1.0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_basic() {
        // [2x3] @ [3x2] = [2x2]
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

        let result = matmul(&a, [2, 3], &b, [3, 2]);

        // [1*1 + 2*3 + 3*5, 1*2 + 2*4 + 3*6] = [22, 28]
        // [4*1 + 5*3 + 6*5, 4*2 + 5*4 + 6*6] = [49, 64]
        assert_eq!(result, vec![22.0, 28.0, 49.0, 64.0]);
    }

    #[test]
    fn test_matmul_identity() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let identity = vec![1.0, 0.0, 0.0, 1.0];

        let result = matmul(&a, [2, 2], &identity, [2, 2]);
        assert_eq!(result, a);
    }

    #[test]
    fn test_matmul_transpose_right() {
        // [[1,1],[1,1]] @ [[2,0],[0,2]]^T
        let grad = vec![1.0, 1.0, 1.0, 1.0];
        let w = vec![2.0, 0.0, 0.0, 2.0];
        let result = matmul_transpose_right(&grad, [2, 2], &w, [2, 2]);
        assert_eq!(result, vec![2.0, 2.0, 2.0, 2.0]);

        // [1x3] @ [2x3]^T = [1x2]
        let x = vec![1.0, 2.0, 3.0];
        let w = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let result = matmul_transpose_right(&x, [1, 3], &w, [2, 3]);
        assert_eq!(result, vec![4.0, 2.0]);
    }

    #[test]
    fn test_matmul_transpose_left_accumulates() {
        // [[1,3],[2,4]] @ [[1,1],[1,1]] = [[4,4],[6,6]]
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let grad = vec![1.0, 1.0, 1.0, 1.0];

        let mut c = vec![0.0; 4];
        matmul_transpose_left_into(&a, [2, 2], &grad, [2, 2], &mut c);
        assert_eq!(c, vec![4.0, 4.0, 6.0, 6.0]);

        matmul_transpose_left_into(&a, [2, 2], &grad, [2, 2], &mut c);
        assert_eq!(c, vec![8.0, 8.0, 12.0, 12.0]);
    }

    #[test]
    #[should_panic(expected = "Inner dimension mismatch")]
    fn test_inner_dimension_mismatch_panics() {
        let mut c = vec![0.0; 4];
        gemm_core(GemmParams {
            a_data: &[0.0; 6],
            a_shape: [2, 3],
            transpose_left: false,
            b_data: &[0.0; 4],
            b_shape: [2, 2],
            transpose_right: false,
            c_data: &mut c,
            alpha: 1.0,
        });
    }
}
