// Kernel accuracy tests - compare kernel implementations with expected outputs
use std::sync::Arc;

use tatami::kernels::matmul_int8::{compute_col_sums, compute_row_sums, matmul_i8};
use tatami::kernels::pack::{pack_deconv_weight, pack_row_major_to_row16x4};
use tatami::kernels::requantize::{
    activation_clamp, requantize_c8, rounding_divide_by_pot, saturating_rounding_doubling_high_mul,
    QuantMultiplier,
};
use tatami::kernels::utils::up_round;
use tatami::kernels::winograd::cook_toom_matrices;
use tatami::runtime::{ActType, ConvParam, CpuContext, KernelRegistry, OpType};
use tatami::tensor::{DataType, Layout, QuantParam, Tensor};

fn assert_close(a: &[f32], b: &[f32], tol: f32, name: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", name);
    let max_diff = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0f32, f32::max);
    if max_diff > tol {
        println!("{} FAILED: max diff = {:.6e} (tol = {:.6e})", name, max_diff, tol);
        println!("Got:      {:?}", &a[..5.min(a.len())]);
        println!("Expected: {:?}", &b[..5.min(b.len())]);
        panic!("{} failed accuracy check", name);
    }
    println!("{} PASSED: max diff = {:.6e}", name, max_diff);
}

fn lcg(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 40) as i32 % 1000) as f32 / 437.0
}

fn conv_param(act: ActType) -> ConvParam {
    ConvParam {
        kernel_h: 3,
        kernel_w: 3,
        stride_h: 1,
        stride_w: 1,
        pad_u: 1,
        pad_d: 1,
        pad_l: 1,
        pad_r: 1,
        dilation_h: 1,
        dilation_w: 1,
        input_channel: 3,
        output_channel: 5,
        act,
    }
}

/// Direct NHWC convolution, the slow reference.
fn direct_conv(
    input: &[f32],
    weight: &[f32],
    bias: &[f32],
    p: &ConvParam,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
    act: ActType,
) -> Vec<f32> {
    let (ic, oc) = (p.input_channel, p.output_channel);
    let mut out = vec![0.0f32; out_h * out_w * oc];
    for oy in 0..out_h {
        for ox in 0..out_w {
            for o in 0..oc {
                let mut acc = bias[o];
                for ky in 0..p.kernel_h {
                    for kx in 0..p.kernel_w {
                        let iy = oy as isize + ky as isize - p.pad_u as isize;
                        let ix = ox as isize + kx as isize - p.pad_l as isize;
                        if iy < 0 || iy as usize >= in_h || ix < 0 || ix as usize >= in_w {
                            continue;
                        }
                        for c in 0..ic {
                            acc += input[((iy as usize) * in_w + ix as usize) * ic + c]
                                * weight[((o * p.kernel_h + ky) * p.kernel_w + kx) * ic + c];
                        }
                    }
                }
                out[(oy * out_w + ox) * oc + o] = match act {
                    ActType::None => acc,
                    ActType::Relu => acc.max(0.0),
                    ActType::Relu6 => acc.clamp(0.0, 6.0),
                };
            }
        }
    }
    out
}

fn winograd_output(act: ActType, in_h: usize, in_w: usize) -> (Vec<f32>, Vec<f32>) {
    let p = conv_param(act);
    let mut state = 7u64;
    let input_data: Vec<f32> = (0..in_h * in_w * p.input_channel).map(|_| lcg(&mut state)).collect();
    let weight_data: Vec<f32> =
        (0..p.output_channel * 9 * p.input_channel).map(|_| lcg(&mut state) * 0.3).collect();
    let bias_data: Vec<f32> = (0..p.output_channel).map(|_| lcg(&mut state)).collect();

    let input = Tensor::new_f32(vec![1, in_h, in_w, p.input_channel], Layout::Nhwc, input_data.clone());
    let weight = Tensor::new_f32(
        vec![p.output_channel, 3, 3, p.input_channel],
        Layout::Nhwc,
        weight_data.clone(),
    );
    let bias = Tensor::new_f32(vec![p.output_channel], Layout::Nhwc, bias_data.clone());
    let mut output = vec![Tensor::zeroed(
        DataType::F32,
        vec![1, in_h, in_w, p.output_channel],
        Layout::Nhwc,
    )];

    let ctx = Arc::new(CpuContext::new(3).unwrap());
    let registry = KernelRegistry::new();
    let mut kernel = registry.create(OpType::Conv2D, p.clone(), ctx).unwrap();
    let inputs = vec![input, weight, bias];
    kernel.init(&inputs).unwrap();
    kernel.resize(&inputs, &output).unwrap();
    kernel.run(&inputs, &mut output).unwrap();

    let expected = direct_conv(&input_data, &weight_data, &bias_data, &p, in_h, in_w, in_h, in_w, act);
    (output[0].as_f32().unwrap().to_vec(), expected)
}

#[test]
fn test_view_matmul() {
    let a = tatami::tensor::TensorView::from_owned(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    let b = tatami::tensor::TensorView::from_owned(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
    let mut out_buf = Vec::new();
    let out = tatami::kernels::gemm::matmul(&a, &b, &mut out_buf);
    assert_eq!(out.shape.as_ref(), &[2, 2]);
    assert_close(&out.data, &[4.0, 5.0, 10.0, 11.0], 1e-6, "view matmul 2x3x2");
}

#[test]
fn test_winograd_f43_generator_matrix() {
    let mats = cook_toom_matrices(4, 3, 1.0).unwrap();
    assert_eq!(mats.input_unit, 6);
    let sixth = 1.0 / 6.0;
    let expected_g = [
        0.25, 0.0, 0.0,
        -sixth, -sixth, -sixth,
        -sixth, sixth, -sixth,
        1.0 / 24.0, 1.0 / 12.0, sixth,
        1.0 / 24.0, -1.0 / 12.0, sixth,
        0.0, 0.0, 1.0,
    ];
    assert_close(&mats.g, &expected_g, 1e-6, "G(4,3)");
}

#[test]
fn test_winograd_conv_matches_direct() {
    let (got, expected) = winograd_output(ActType::None, 8, 8);
    assert_close(&got, &expected, 1e-3, "winograd conv 8x8x3 -> 5");
}

#[test]
fn test_winograd_conv_relu6_and_ragged_edge() {
    // 7x9 output is not a multiple of the tile edge, exercising border tiles
    let (got, expected) = winograd_output(ActType::Relu6, 7, 9);
    assert_close(&got, &expected, 1e-3, "winograd conv relu6 7x9");
    assert!(got.iter().all(|&v| (0.0..=6.0).contains(&v)));
}

#[test]
fn test_winograd_zero_weights_give_zero_output() {
    let p = conv_param(ActType::None);
    let mut state = 11u64;
    let input = Tensor::new_f32(
        vec![1, 8, 8, p.input_channel],
        Layout::Nhwc,
        (0..8 * 8 * p.input_channel).map(|_| lcg(&mut state)).collect(),
    );
    let weight = Tensor::new_f32(
        vec![p.output_channel, 3, 3, p.input_channel],
        Layout::Nhwc,
        vec![0.0; p.output_channel * 9 * p.input_channel],
    );
    let mut outputs = vec![Tensor::zeroed(
        DataType::F32,
        vec![1, 8, 8, p.output_channel],
        Layout::Nhwc,
    )];
    let ctx = Arc::new(CpuContext::new(2).unwrap());
    let registry = KernelRegistry::new();
    let mut kernel = registry.create(OpType::Conv2D, p, ctx).unwrap();
    let inputs = vec![input, weight];
    kernel.init(&inputs).unwrap();
    kernel.resize(&inputs, &outputs).unwrap();
    kernel.run(&inputs, &mut outputs).unwrap();
    assert!(outputs[0].as_f32().unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn test_winograd_deterministic_across_runs() {
    let (a, _) = winograd_output(ActType::None, 8, 8);
    let (b, _) = winograd_output(ActType::None, 8, 8);
    assert_eq!(a, b, "same input must give bitwise identical output");
}

#[test]
fn test_winograd_rejects_unsupported_geometry() {
    let ctx = Arc::new(CpuContext::new(1).unwrap());
    let registry = KernelRegistry::new();

    // 7x7 kernel pushes the input unit past the supported point sets
    let mut p = conv_param(ActType::None);
    p.kernel_h = 7;
    p.kernel_w = 7;
    let weight = Tensor::new_f32(vec![5, 7, 7, 3], Layout::Nhwc, vec![0.0; 5 * 49 * 3]);
    let act = Tensor::zeroed(DataType::F32, vec![1, 8, 8, 3], Layout::Nhwc);
    let mut kernel = registry.create(OpType::Conv2D, p, ctx.clone()).unwrap();
    assert!(kernel.init(&[act.clone(), weight]).is_err());

    // stride 2 is rejected at resize
    let mut p = conv_param(ActType::None);
    p.stride_h = 2;
    p.stride_w = 2;
    let weight = Tensor::new_f32(vec![5, 3, 3, 3], Layout::Nhwc, vec![0.0; 5 * 9 * 3]);
    let out = Tensor::zeroed(DataType::F32, vec![1, 8, 8, 5], Layout::Nhwc);
    let mut kernel = registry.create(OpType::Conv2D, p, ctx).unwrap();
    let inputs = vec![act, weight];
    kernel.init(&inputs).unwrap();
    assert!(kernel.resize(&inputs, std::slice::from_ref(&out)).is_err());

    // rank-3 activation must surface a shape error instead of panicking
    let p = conv_param(ActType::None);
    let weight = Tensor::new_f32(vec![5, 3, 3, 3], Layout::Nhwc, vec![0.0; 5 * 9 * 3]);
    let rank3 = Tensor::new_f32(vec![8, 8, 3], Layout::Nhwc, vec![0.0; 8 * 8 * 3]);
    let out = Tensor::zeroed(DataType::F32, vec![1, 8, 8, 5], Layout::Nhwc);
    let ctx = Arc::new(CpuContext::new(1).unwrap());
    let mut kernel = registry.create(OpType::Conv2D, p, ctx).unwrap();
    let inputs = vec![rank3, weight];
    kernel.init(&inputs).unwrap();
    assert!(kernel.resize(&inputs, std::slice::from_ref(&out)).is_err());
}

#[test]
fn test_quant_multiplier_decomposition() {
    let qm = QuantMultiplier::new(0.0183649725490196);
    assert_eq!((qm.multiplier, qm.left_shift, qm.right_shift), (1262031304, 0, 5));
    let qm = QuantMultiplier::new(0.31228156 * 0.023649725490196 / 0.3439215686275);
    assert_eq!((qm.multiplier, qm.left_shift, qm.right_shift), (1475682324, 0, 5));
    let qm = QuantMultiplier::new(0.0);
    assert_eq!(qm.multiplier, 0);
}

#[test]
fn test_fixed_point_rounding_primitives() {
    assert_eq!(saturating_rounding_doubling_high_mul(i32::MIN, i32::MIN), i32::MAX);
    assert_eq!(saturating_rounding_doubling_high_mul(1 << 30, 1 << 30), 1 << 29);
    // round half away from zero
    assert_eq!(rounding_divide_by_pot(3, 1), 2);
    assert_eq!(rounding_divide_by_pot(-3, 1), -2);
    assert_eq!(rounding_divide_by_pot(5, 2), 1);
    assert_eq!(rounding_divide_by_pot(-5, 2), -1);
    assert_eq!(rounding_divide_by_pot(6, 2), 2);
    assert_eq!(rounding_divide_by_pot(-6, 2), -2);
    assert_eq!(rounding_divide_by_pot(7, 0), 7);
}

const REQUANT_ACC: [i32; 128] = [
    -4956, -3923, 868, -8880, -4089, -5179, -4526, -4527, -10464, 99, -5826, -2995, -4519, -4519,
    -10509, -2505, -11272, 434, -4522, -4523, -5287, -8936, -878, 373, -4528, -4529, -1960,
    -6589, 1688, 2287, -8059, 926, -2506, -6972, -2834, -8281, -8118, -3110, -4526, -4527, -4528,
    -4529, -4519, -4519, -4519, -4519, -4519, -4519, -4520, -4521, -4522, -4523, -4524, -4525,
    -4526, -4527, -4528, -4529, -4519, -4519, -4519, -4519, -4519, -4519, 1578, 2231, -4522,
    -4523, -4524, -4525, -4526, -4527, -8449, -990, -4519, -4519, -4519, -4519, -4519, -4519,
    -4303, -10293, -4522, -4523, -4524, -4525, -4526, -4527, -4528, -4529, -4519, -4519, -4519,
    -4519, -4519, -4519, -7025, 924, -4522, -4523, -4524, -4525, -4526, -4527, -4528, -4529,
    -4519, -4519, -4519, -4519, -4519, -4519, -4520, -4521, -4522, -4523, -4524, -4525, -4526,
    -4527, -4528, -4529, -4519, -4519, -4519, -4519, -4519, -4519,
];

fn requant_fixture(min: i32, max: i32) -> Vec<i8> {
    let bias: Vec<i32> = (1..=10).collect();
    let qm = QuantMultiplier::new(0.0183649725490196);
    let mut dst = vec![0i8; 50];
    requantize_c8(&REQUANT_ACC, &mut dst, Some(&bias), 5, 8, 10, &qm, 83, min, max).unwrap();
    dst
}

#[test]
fn test_requantize_c8_plain() {
    let expected: [i8; 50] = [
        -8, 11, 99, -80, 8, -12, 0, 0, 112, 124, -109, 85, -24, 28, 0, 0, -110, 37, -72, 65,
        -124, 91, 0, 0, -14, -81, 67, 90, 4, -106, 0, 0, 47, -38, 114, 125, -65, 100, 0, 0, 37,
        -45, 31, -69, -66, 26, 0, 0, -46, 100,
    ];
    assert_eq!(requant_fixture(-128, 127).as_slice(), expected.as_slice());
}

#[test]
fn test_requantize_c8_relu() {
    let expected: [i8; 50] = [
        0, 11, 99, 0, 8, 0, 0, 0, 112, 124, 0, 85, 0, 28, 0, 0, 0, 37, 0, 65, 0, 91, 0, 0, 0, 0,
        67, 90, 4, 0, 0, 0, 47, 0, 114, 125, 0, 100, 0, 0, 37, 0, 31, 0, 0, 26, 0, 0, 0, 100,
    ];
    assert_eq!(requant_fixture(0, 127).as_slice(), expected.as_slice());
}

#[test]
fn test_requantize_c8_relu6() {
    let expected: [i8; 50] = [
        0, 6, 6, 0, 6, 0, 0, 0, 6, 6, 0, 6, 0, 6, 0, 0, 0, 6, 0, 6, 0, 6, 0, 0, 0, 0, 6, 6, 4,
        0, 0, 0, 6, 0, 6, 6, 0, 6, 0, 0, 6, 0, 6, 0, 0, 6, 0, 0, 0, 6,
    ];
    assert_eq!(requant_fixture(0, 6).as_slice(), expected.as_slice());
}

#[test]
fn test_activation_clamp_bounds() {
    let q = QuantParam { scale: 0.3439215686275, zero_point: 31 };
    assert_eq!(activation_clamp(ActType::None, &q), (-128, 127));
    // real zero quantizes to the zero point, so relu floors there
    assert_eq!(activation_clamp(ActType::Relu, &q), (31, 127));
    // real 6 sits round(6/scale) = 17 steps above the zero point
    assert_eq!(activation_clamp(ActType::Relu6, &q), (31, 48));
    // a fine scale pushes the relu6 ceiling past i8 range; it saturates
    let fine = QuantParam { scale: 0.01, zero_point: 0 };
    assert_eq!(activation_clamp(ActType::Relu6, &fine), (0, 127));
}

const MM_A: [i8; 120] = [
    -6, 76, 32, 80, -73, 8, -85, -3, 114, 80, 30, 42, -41, 117, 62, -76, -77, -111, 88, 105, 68,
    105, -74, 13, 51, 94, 31, -52, -92, -4, -35, -71, 101, -93, 46, -65, 57, -41, -51, 77, 1, 9,
    73, -19, -36, 57, 81, -24, 40, 103, 112, 109, -41, -68, 57, 61, 55, -20, 3, 2, 17, -16, -31,
    58, -4, 67, -4, -95, -5, -72, 81, 15, -7, -16, -47, 112, 114, -26, -98, 53, 15, -49, 26, 19,
    19, 8, -57, -35, -79, 118, 29, 21, 37, -48, 83, 7, 124, 113, -5, 15, -8, 107, -65, -88, 50,
    -47, -80, -84, 3, -45, 92, 42, -20, -101, 106, -10, 89, 67, 55, 10,
];

const MM_W: [i8; 216] = [
    92, 27, 22, 52, -112, -20, -57, -2, 89, 32, 93, -66, -25, -54, 94, -97, -119, -98, 101, -99,
    77, -83, 76, 95, 59, 97, 8, 40, -109, -20, 67, -107, 37, -6, -54, -20, -30, 36, -106, -103,
    -3, -86, -82, 59, 4, -75, -50, -106, 55, 104, -117, -71, -20, -85, -77, 16, -25, -58, 4, 80,
    -75, 94, 32, -68, 2, 40, 56, -103, 11, -98, -70, -69, 0, 57, -6, 82, 66, -112, -61, 33, -77,
    -53, 95, -38, 87, -46, -3, 81, -47, 43, 21, 26, -45, -57, 50, -24, -82, -114, 61, 46, -53,
    78, -24, 31, -7, 37, 29, 38, 45, 106, 52, -42, 31, -6, -61, -87, 2, 79, -5, -42, 43, -106,
    -104, 7, 91, -63, 58, 97, -15, 74, -96, 15, -23, -3, -47, -97, 100, -54, 26, -46, 35, 26,
    100, -80, 34, -25, 96, -67, -80, -27, 66, 41, 41, -43, -43, -38, -4, -64, 31, 7, -8, 6, -2,
    39, -119, 53, 75, -91, -44, 77, -62, 22, -44, 78, -67, -48, -115, -4, 43, 81, 40, -20, -5,
    -89, 60, -62, -4, -48, 66, -64, -69, 62, 17, -89, 1, 87, 81, 32, -29, 51, 40, 27, 66, 67,
    11, -69, 85, -79, -106, 55, 22, -23, 62, 69, -74, 49,
];

#[test]
fn test_int8_matmul_zero_point_correction() {
    // 10x12 activation against a 12-deep, 3-tap, 6-channel deconv weight
    let (input_zp, weight_zp) = (15, -20);
    let (rows, deep, kp, oc) = (10usize, 12usize, 3usize, 6usize);
    let deep16 = up_round(deep, 16);
    let n = kp * 8;

    let mut packed_a = vec![0i8; up_round(rows, 4) * deep16];
    pack_row_major_to_row16x4(&MM_A, &mut packed_a, rows, deep, input_zp as i8);
    let mut packed_w = vec![0i8; n * deep16];
    pack_deconv_weight(&MM_W, &mut packed_w, deep, oc, kp, weight_zp as i8);

    let mut row_sums = vec![0i32; 12];
    compute_row_sums(&packed_a, &mut row_sums, 12, deep16, weight_zp);
    let expected_row_sums = [
        -7100, -4780, 580, -4880, -9460, -1420, -3120, -3260, -1840, -6960, -4800, -4800,
    ];
    assert_eq!(row_sums.as_slice(), expected_row_sums.as_slice());

    let mut col_sums = vec![0i32; n];
    compute_col_sums(&packed_w, &mut col_sums, n, deep16, input_zp, weight_zp);
    let expected_col_sums = [
        7395, 8265, 3090, 435, 5655, 1035, 0, 0, -1695, 4770, 6630, -300, 765, 2835, 0, 0, 7395,
        -4665, 2475, 4170, 2880, 1110, 0, 0,
    ];
    assert_eq!(col_sums.as_slice(), expected_col_sums.as_slice());

    let mut dst = vec![0i32; rows * n];
    matmul_i8(&packed_a, &packed_w, &row_sums, &col_sums, rows, n, deep, &mut dst).unwrap();

    // every output equals the exact zero-point-corrected dot product
    for r in 0..rows {
        for p in 0..kp {
            for o in 0..oc {
                let naive: i32 = (0..deep)
                    .map(|k| {
                        (MM_A[r * deep + k] as i32 - input_zp)
                            * (MM_W[(k * kp + p) * oc + o] as i32 - weight_zp)
                    })
                    .sum();
                assert_eq!(dst[r * n + p * 8 + o], naive, "mismatch at r={} p={} o={}", r, p, o);
            }
        }
    }

    assert!(matmul_i8(&packed_a, &packed_w, &row_sums, &col_sums, 0, n, deep, &mut dst).is_err());
}
