//! Quantized int8 matrix multiply over pre-packed operands, with zero-point
//! correction folded into per-row and per-column sum terms.
//!
//! The packed activation is [up4(m)][up16(deep)] row-major and the packed
//! weight is [n][up16(deep)] row-major with n already rounded to its block
//! size, so one output element is a dot product of an activation row with a
//! weight row over the padded depth.

use crate::error::KernelError;
use crate::kernels::pack::C16;
use crate::kernels::utils::up_round;

/// row_sums[r] = weight_zp * sum_k packed_a[r][k], over the padded depth.
/// Activation pads are filled with the input zero point, so the pad
/// contribution cancels exactly against the matching col_sums pad term.
pub fn compute_row_sums(packed_a: &[i8], row_sums: &mut [i32], rows: usize, deep16: usize, weight_zp: i32) {
    for r in 0..rows {
        let mut sum = 0i32;
        for k in 0..deep16 {
            sum += packed_a[r * deep16 + k] as i32;
        }
        row_sums[r] = sum * weight_zp;
    }
}

/// col_sums[c] = input_zp * sum_k packed_w[c][k] - deep16 * input_zp * weight_zp.
/// Weight pads are filled with the weight zero point, so both the sum and the
/// correction run over the padded depth; a fully-padded column sums to zero
/// and contributes nothing to any output.
pub fn compute_col_sums(
    packed_w: &[i8],
    col_sums: &mut [i32],
    cols: usize,
    deep16: usize,
    input_zp: i32,
    weight_zp: i32,
) {
    let bias = deep16 as i32 * input_zp * weight_zp;
    for c in 0..cols {
        let mut sum = 0i32;
        for k in 0..deep16 {
            sum += packed_w[c * deep16 + k] as i32;
        }
        col_sums[c] = sum * input_zp - bias;
    }
}

/// dst[r][c] = sum_k a[r][k]*w[c][k] - row_sums[r] - col_sums[c], which equals
/// the exact zero-point-corrected product sum_k (a-za)(w-zw). The accumulator
/// cannot overflow: deep16 * 127 * 127 stays far below i32::MAX for any depth
/// this engine packs.
pub fn matmul_i8(
    packed_a: &[i8],
    packed_w: &[i8],
    row_sums: &[i32],
    col_sums: &[i32],
    m: usize,
    n: usize,
    deep: usize,
    dst: &mut [i32],
) -> Result<(), KernelError> {
    if m == 0 || n == 0 || deep == 0 {
        return Err(KernelError::precondition(format!(
            "int8 matmul with empty dimension m={} n={} deep={}",
            m, n, deep
        )));
    }
    let deep16 = up_round(deep, C16);
    if packed_a.len() < m * deep16 || packed_w.len() < n * deep16 {
        return Err(KernelError::precondition("packed operand shorter than m/n * up16(deep)"));
    }
    if row_sums.len() < m || col_sums.len() < n || dst.len() < m * n {
        return Err(KernelError::precondition("sum or destination buffer too small"));
    }
    for r in 0..m {
        let a_row = &packed_a[r * deep16..r * deep16 + deep16];
        for c in 0..n {
            let w_row = &packed_w[c * deep16..c * deep16 + deep16];
            let mut acc = 0i32;
            for k in 0..deep16 {
                acc += a_row[k] as i32 * w_row[k] as i32;
            }
            dst[r * n + c] = acc - row_sums[r] - col_sums[c];
        }
    }
    Ok(())
}
