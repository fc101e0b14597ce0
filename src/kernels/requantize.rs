//! Fixed-point requantization from i32 accumulators back to i8, word-for-word
//! compatible with the gemmlowp rounding pipeline: saturating rounding doubling
//! high multiply, then a rounding divide by a power of two, then zero point,
//! clamp, and cast.

use crate::error::KernelError;
use crate::kernels::pack::C8;
use crate::kernels::utils::up_div;
use crate::runtime::ActType;
use crate::tensor::QuantParam;

/// A real-valued scale factor in fixed-point form: a Q31 significand plus a
/// split binary exponent (at most one of left/right shift is non-zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantMultiplier {
    pub multiplier: i32,
    pub left_shift: i32,
    pub right_shift: i32,
}

impl QuantMultiplier {
    /// Decomposes `scale` as significand * 2^shift with the significand scaled
    /// into [2^30, 2^31]. A scale of zero maps to the zero multiplier.
    pub fn new(scale: f64) -> Self {
        if scale == 0.0 {
            return QuantMultiplier { multiplier: 0, left_shift: 0, right_shift: 0 };
        }
        // frexp: scale = frac * 2^shift with frac in [0.5, 1)
        let mut shift = scale.abs().log2().floor() as i32 + 1;
        let mut frac = scale / f64::powi(2.0, shift);
        if frac.abs() >= 1.0 {
            frac /= 2.0;
            shift += 1;
        } else if frac.abs() < 0.5 {
            frac *= 2.0;
            shift -= 1;
        }
        let mut q = (frac * (1i64 << 31) as f64).round() as i64;
        if q == 1i64 << 31 {
            q /= 2;
            shift += 1;
        }
        if shift < -31 {
            return QuantMultiplier { multiplier: 0, left_shift: 0, right_shift: 0 };
        }
        debug_assert!(q <= i32::MAX as i64);
        QuantMultiplier {
            multiplier: q as i32,
            left_shift: if shift > 0 { shift } else { 0 },
            right_shift: if shift > 0 { 0 } else { -shift },
        }
    }

    /// Multiplier for requantizing input*weight accumulators to the output
    /// scale: (input_scale * weight_scale) / output_scale.
    pub fn from_scales(input: &QuantParam, weight: &QuantParam, output: &QuantParam) -> Self {
        QuantMultiplier::new(input.scale * weight.scale / output.scale)
    }
}

/// Rounding-to-nearest doubling high multiply: (a*b*2) >> 31 with the nudge
/// applied before a truncating division, saturating only on a==b==i32::MIN.
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge = if ab >= 0 { 1i64 << 30 } else { 1 - (1i64 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// x / 2^exponent rounded half away from zero.
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    let mask = (1i64 << exponent) - 1;
    let remainder = x as i64 & mask;
    let quotient = (x as i64 >> exponent) as i32;
    let mut threshold = mask >> 1;
    if x < 0 {
        threshold += 1;
    }
    if remainder > threshold {
        quotient + 1
    } else {
        quotient
    }
}

#[inline]
pub fn multiply_by_quantized_multiplier(value: i32, qm: &QuantMultiplier) -> i32 {
    let shifted = value << qm.left_shift;
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(shifted, qm.multiplier),
        qm.right_shift,
    )
}

/// Output clamp bounds for an activation, expressed in the quantized domain:
/// real 0 maps to the output zero point and real 6 to round(6/scale) above it.
pub fn activation_clamp(act: ActType, out: &QuantParam) -> (i32, i32) {
    match act {
        ActType::None => (i8::MIN as i32, i8::MAX as i32),
        ActType::Relu => (out.zero_point.max(i8::MIN as i32), i8::MAX as i32),
        ActType::Relu6 => {
            let lo = out.zero_point.max(i8::MIN as i32);
            let hi = ((6.0 / out.scale).round() as i32 + out.zero_point).min(i8::MAX as i32);
            (lo, hi)
        }
    }
}

#[inline]
fn requantize_one(acc: i32, bias: i32, qm: &QuantMultiplier, out_zp: i32, min: i32, max: i32) -> i8 {
    let v = multiply_by_quantized_multiplier(acc + bias, qm) + out_zp;
    v.clamp(min, max) as i8
}

/// Requantizes one C8 channel block. `src` is [plane_stride][8] for this
/// block, `dst` is NHWC with `channel` as the innermost stride, `oc_base` the
/// first output channel of the block and `oc_count` how many of its 8 lanes
/// are valid.
pub fn requantize_c8_block(
    src: &[i32],
    dst: &mut [i8],
    bias: Option<&[i32]>,
    plane: usize,
    channel: usize,
    oc_base: usize,
    oc_count: usize,
    qm: &QuantMultiplier,
    out_zp: i32,
    min: i32,
    max: i32,
) {
    for hw in 0..plane {
        for r in 0..oc_count {
            let oc = oc_base + r;
            let b = bias.map_or(0, |b| b[oc]);
            let acc = src[hw * C8 + r];
            dst[hw * channel + oc] = requantize_one(acc, b, qm, out_zp, min, max);
        }
    }
}

/// Requantizes a full [oc8_block][plane_stride][8] accumulator buffer into an
/// NHWC i8 destination. `plane` is the number of valid spatial positions,
/// `plane_stride` the padded per-block spatial stride.
pub fn requantize_c8(
    src: &[i32],
    dst: &mut [i8],
    bias: Option<&[i32]>,
    plane: usize,
    plane_stride: usize,
    channel: usize,
    qm: &QuantMultiplier,
    out_zp: i32,
    min: i32,
    max: i32,
) -> Result<(), KernelError> {
    let blocks = up_div(channel, C8);
    if src.len() < blocks * plane_stride * C8 {
        return Err(KernelError::precondition("requantize source buffer too small"));
    }
    if dst.len() < plane * channel {
        return Err(KernelError::precondition("requantize destination buffer too small"));
    }
    if plane > plane_stride {
        return Err(KernelError::precondition("plane exceeds plane stride"));
    }
    for blk in 0..blocks {
        let oc_base = blk * C8;
        let oc_count = C8.min(channel - oc_base);
        requantize_c8_block(
            &src[blk * plane_stride * C8..],
            dst,
            bias,
            plane,
            channel,
            oc_base,
            oc_count,
            qm,
            out_zp,
            min,
            max,
        );
    }
    Ok(())
}

/// Per-channel requantization of a row-major [plane][channel] accumulator
/// buffer, one multiplier per output channel.
pub fn requantize_per_channel(
    src: &[i32],
    dst: &mut [i8],
    bias: Option<&[i32]>,
    plane: usize,
    channel: usize,
    qms: &[QuantMultiplier],
    out_zp: i32,
    min: i32,
    max: i32,
) -> Result<(), KernelError> {
    if qms.len() < channel {
        return Err(KernelError::precondition(format!(
            "per-channel requantize needs {} multipliers, got {}",
            channel,
            qms.len()
        )));
    }
    if src.len() < plane * channel || dst.len() < plane * channel {
        return Err(KernelError::precondition("requantize buffer shorter than plane*channel"));
    }
    for hw in 0..plane {
        for c in 0..channel {
            let b = bias.map_or(0, |b| b[c]);
            dst[hw * channel + c] =
                requantize_one(src[hw * channel + c], b, &qms[c], out_zp, min, max);
        }
    }
    Ok(())
}
