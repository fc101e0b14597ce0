use matrixmultiply::sgemm;

use crate::kernels::utils::ensure_capacity;
use crate::tensor::TensorView;

/// Batched view-level matmul: trailing two dims multiply, leading dims are
/// the batch (the right operand may carry batch 1 and be reused). The output
/// borrows `out_buf`, which is grown as needed and reused across calls.
pub fn matmul<'a>(
    a: &TensorView<'_, f32>,
    b: &TensorView<'_, f32>,
    out_buf: &'a mut Vec<f32>,
) -> TensorView<'a, f32> {
    let a_dims = a.shape.len();
    let b_dims = b.shape.len();
    assert!(a_dims >= 2);
    assert!(b_dims >= 2);
    let m = a.shape[a_dims - 2];
    let k = a.shape[a_dims - 1];
    let k_b = b.shape[b_dims - 2];
    let n = b.shape[b_dims - 1];
    assert_eq!(k, k_b, "matmul K dim mismatch: {} vs {}", k, k_b);
    let batch_a: usize = a.shape[..a_dims - 2].iter().product();
    let batch_b: usize = b.shape[..b_dims - 2].iter().product();
    assert!(batch_b == 1 || batch_b == batch_a, "matmul batch mismatch");
    let mut out_shape = a.shape[..a_dims - 2].to_vec();
    out_shape.push(m);
    out_shape.push(n);
    ensure_capacity(out_buf, batch_a * m * n);
    for batch in 0..batch_a {
        let a_off = batch * m * k;
        let b_off = if batch_b == 1 { 0 } else { batch * k * n };
        matmul_f32(
            m,
            k,
            n,
            &a.data[a_off..a_off + m * k],
            &b.data[b_off..b_off + k * n],
            &mut out_buf[batch * m * n..(batch + 1) * m * n],
        );
    }
    TensorView::from_slice(out_buf, out_shape)
}

/// dst = a * b, all row-major: a is [m][k], b is [k][n], dst is [m][n].
/// Replaces the destination (beta = 0).
pub fn matmul_f32(m: usize, k: usize, n: usize, a: &[f32], b: &[f32], dst: &mut [f32]) {
    debug_assert!(a.len() >= m * k);
    debug_assert!(b.len() >= k * n);
    debug_assert!(dst.len() >= m * n);
    unsafe {
        sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            k as isize,
            1,
            b.as_ptr(),
            n as isize,
            1,
            0.0,
            dst.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}
