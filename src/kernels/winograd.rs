//! Winograd (Cook–Toom) convolution transforms. The interpolation matrices
//! are a pure function of `(output_unit, kernel_unit, coef)`; weights are
//! pre-transformed once at kernel init and consumed read-only by every run.

use crate::error::KernelError;
use crate::kernels::gemm::{matmul, matmul_f32};
use crate::kernels::utils::{up_div, up_round};
use crate::tensor::TensorView;

/// The six fixed interpolation matrices for one tile geometry, row-major.
/// G is [input_unit][kernel_unit], B is [input_unit][input_unit],
/// A is [input_unit][output_unit]; the transposed forms are stored alongside.
#[derive(Debug, Clone)]
pub struct WinogradMatrices {
    pub input_unit: usize,
    pub output_unit: usize,
    pub kernel_unit: usize,
    pub g: Vec<f32>,
    pub gt: Vec<f32>,
    pub b: Vec<f32>,
    pub bt: Vec<f32>,
    pub a: Vec<f32>,
    pub at: Vec<f32>,
}

fn poly_mul(p: &[f64], q: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; p.len() + q.len() - 1];
    for (i, &x) in p.iter().enumerate() {
        for (j, &y) in q.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn transpose(src: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = src[r * cols + c];
        }
    }
    out
}

fn to_f32(v: Vec<f64>) -> Vec<f32> {
    v.into_iter().map(|x| x as f32).collect()
}

/// Interpolation points 0, coef, -coef, 2*coef, -2*coef, ... (the point at
/// infinity is handled by the last matrix row/column).
fn interpolation_points(count: usize, coef: f64) -> Vec<f64> {
    let mut pts = Vec::with_capacity(count);
    pts.push(0.0);
    let mut i = 1.0;
    while pts.len() < count {
        pts.push(i * coef);
        if pts.len() < count {
            pts.push(-i * coef);
        }
        i += 1.0;
    }
    pts
}

/// Solves the Cook–Toom construction for `output_unit` outputs per tile and a
/// `kernel_unit`-wide filter. Fails when the geometry has no supported
/// interpolation point set (input_unit > 8) or the units are degenerate.
pub fn cook_toom_matrices(
    output_unit: usize,
    kernel_unit: usize,
    coef: f64,
) -> Result<WinogradMatrices, KernelError> {
    if output_unit < 2 || kernel_unit < 2 {
        return Err(KernelError::shape(format!(
            "winograd units must be >= 2, got output {} kernel {}",
            output_unit, kernel_unit
        )));
    }
    let n = output_unit + kernel_unit - 1;
    if n > 8 {
        return Err(KernelError::shape(format!(
            "no interpolation point set for input unit {}",
            n
        )));
    }
    let pts = interpolation_points(n - 1, coef);

    // G: scaled Vandermonde rows 1/Ni * [1, a, a^2, ...]; last row is the
    // point at infinity.
    let mut g = vec![0.0f64; n * kernel_unit];
    for (i, &a) in pts.iter().enumerate() {
        let mut ni = 1.0;
        for (j, &b) in pts.iter().enumerate() {
            if i != j {
                ni *= a - b;
            }
        }
        let mut pow = 1.0;
        for j in 0..kernel_unit {
            g[i * kernel_unit + j] = pow / ni;
            pow *= a;
        }
    }
    g[(n - 1) * kernel_unit + kernel_unit - 1] = 1.0;

    // BT rows i < n-1: coefficients of M(x)/(x - a_i); last row: M(x) itself.
    let mut bt = vec![0.0f64; n * n];
    for i in 0..n - 1 {
        let mut p = vec![1.0];
        for (k, &b) in pts.iter().enumerate() {
            if k != i {
                p = poly_mul(&p, &[-b, 1.0]);
            }
        }
        bt[i * n..i * n + p.len()].copy_from_slice(&p);
    }
    let mut full = vec![1.0];
    for &b in &pts {
        full = poly_mul(&full, &[-b, 1.0]);
    }
    bt[(n - 1) * n..(n - 1) * n + full.len()].copy_from_slice(&full);

    // AT: evaluation matrix, one column per point plus the infinity column.
    let mut at = vec![0.0f64; output_unit * n];
    for i in 0..output_unit {
        for (j, &a) in pts.iter().enumerate() {
            at[i * n + j] = a.powi(i as i32);
        }
    }
    at[(output_unit - 1) * n + n - 1] = 1.0;

    let gt = transpose(&g, n, kernel_unit);
    let b = transpose(&bt, n, n);
    let a = transpose(&at, output_unit, n);
    Ok(WinogradMatrices {
        input_unit: n,
        output_unit,
        kernel_unit,
        g: to_f32(g),
        gt: to_f32(gt),
        b: to_f32(b),
        bt: to_f32(bt),
        a: to_f32(a),
        at: to_f32(at),
    })
}

/// Transformed-weight buffer length for the blocked destination layout
/// [input_unit^2][channel_in][oc_block_count][oc_block].
pub fn transformed_weight_len(
    mats: &WinogradMatrices,
    channel_in: usize,
    channel_out: usize,
    oc_block: usize,
) -> usize {
    let iu = mats.input_unit;
    iu * iu * channel_in * up_round(channel_out, oc_block)
}

/// Pre-transforms convolution weights (OHWI: [oc][kh][kw][ic]) into the
/// Winograd domain: per output channel, trans = G * w * Gt computed as two
/// small matrix multiplies (row pass then column pass), scattered into the
/// destination blocked by `oc_block`. Deterministic; identical inputs yield
/// byte-identical output. The destination is fully overwritten on success and
/// untouched on error.
pub fn transform_weights(
    weights: &[f32],
    channel_out: usize,
    channel_in: usize,
    mats: &WinogradMatrices,
    oc_block: usize,
    dst: &mut [f32],
) -> Result<(), KernelError> {
    if oc_block == 0 {
        return Err(KernelError::precondition("oc_block must be non-zero"));
    }
    let iu = mats.input_unit;
    let ku = mats.kernel_unit;
    let oc_blocks = up_div(channel_out, oc_block);
    let oc_round = oc_blocks * oc_block;
    let needed = iu * iu * channel_in * oc_round;
    if dst.len() < needed {
        return Err(KernelError::precondition(format!(
            "transformed weight buffer too small: {} < {}",
            dst.len(),
            needed
        )));
    }
    if weights.len() < channel_out * ku * ku * channel_in {
        return Err(KernelError::precondition(
            "weight buffer smaller than oc*kh*kw*ic",
        ));
    }
    dst[..needed].fill(0.0);

    let g = TensorView::from_slice(&mats.g, vec![iu, ku]);
    let gt = TensorView::from_slice(&mats.gt, vec![ku, iu]);
    let mut w_ic = vec![0.0f32; ku * ku];
    let mut row_buf = Vec::new();
    let mut u_buf = Vec::new();
    for o in 0..channel_out {
        let blk = o / oc_block;
        let rem = o % oc_block;
        for c in 0..channel_in {
            for ky in 0..ku {
                for kx in 0..ku {
                    w_ic[ky * ku + kx] = weights[((o * ku + ky) * ku + kx) * channel_in + c];
                }
            }
            // row pass then column pass of the separable 2-D transform
            let w = TensorView::from_slice(&w_ic, vec![ku, ku]);
            let rows = matmul(&g, &w, &mut row_buf);
            let u = matmul(&rows, &gt, &mut u_buf);
            for p in 0..iu * iu {
                dst[((p * channel_in + c) * oc_blocks + blk) * oc_block + rem] = u.data[p];
            }
        }
    }
    Ok(())
}

/// v = Bt * d * B for one input tile (input_unit x input_unit).
/// `tmp` must hold input_unit^2 elements.
pub fn transform_input_tile(d: &[f32], mats: &WinogradMatrices, v: &mut [f32], tmp: &mut [f32]) {
    let iu = mats.input_unit;
    matmul_f32(iu, iu, iu, &mats.bt, d, tmp);
    matmul_f32(iu, iu, iu, tmp, &mats.b, v);
}

/// y = At * m * A for one tile (output_unit x output_unit).
/// `tmp` must hold output_unit * input_unit elements.
pub fn transform_output_tile(m: &[f32], mats: &WinogradMatrices, y: &mut [f32], tmp: &mut [f32]) {
    let iu = mats.input_unit;
    let ou = mats.output_unit;
    matmul_f32(ou, iu, iu, &mats.at, m, tmp);
    matmul_f32(ou, iu, ou, tmp, &mats.a, y);
}
