//! Layout packers: pure, deterministic rearrangements between row-major and
//! blocked/tiled storage orders. Block-padded positions are filled with a
//! caller-supplied pad value; for int8 buffers this is the quantization
//! zero-point (a zero pad would bias the integer dot product).

use crate::kernels::utils::{up_div, up_round};

pub const C8: usize = 8;
pub const C16: usize = 16;
pub const R4: usize = 4;

/// Row-major [rows][cols] -> [up4(rows)][up16(cols)]; every position outside
/// the valid extent gets `pad`.
pub fn pack_row_major_to_row16x4(src: &[i8], dst: &mut [i8], rows: usize, cols: usize, pad: i8) {
    let col16 = up_round(cols, C16);
    let row4 = up_round(rows, R4);
    debug_assert!(src.len() >= rows * cols);
    debug_assert!(dst.len() >= row4 * col16);
    dst[..row4 * col16].fill(pad);
    for r in 0..rows {
        let s = &src[r * cols..r * cols + cols];
        dst[r * col16..r * col16 + cols].copy_from_slice(s);
    }
}

/// Inverse of `pack_row_major_to_row16x4` over the valid region.
pub fn unpack_row16x4_to_row_major(src: &[i8], dst: &mut [i8], rows: usize, cols: usize) {
    let col16 = up_round(cols, C16);
    debug_assert!(src.len() >= up_round(rows, R4) * col16);
    debug_assert!(dst.len() >= rows * cols);
    for r in 0..rows {
        dst[r * cols..r * cols + cols].copy_from_slice(&src[r * col16..r * col16 + cols]);
    }
}

/// NHWC [n][hw][c] -> channel-blocked [c8_block][hw][n][8]. Positions in a
/// trailing partial channel block keep whatever `dst` held (callers pre-fill
/// with the pad value they want, typically 0 for weight staging).
pub fn pack_nhwc_to_c8hwn8(src: &[i8], dst: &mut [i8], batch: usize, plane: usize, channel: usize) {
    debug_assert!(dst.len() >= up_div(channel, C8) * plane * batch * C8);
    for c in 0..channel {
        let blk = c / C8;
        let rem = c % C8;
        for hw in 0..plane {
            for n in 0..batch {
                let dst_idx = ((blk * plane + hw) * batch + n) * C8 + rem;
                dst[dst_idx] = src[(n * plane + hw) * channel + c];
            }
        }
    }
}

/// NCHW [n][c][hw] -> NHWC [n][hw][c].
pub fn pack_nchw_to_nhwc<T: Copy>(src: &[T], dst: &mut [T], batch: usize, plane: usize, channel: usize) {
    for n in 0..batch {
        let base = n * plane * channel;
        for c in 0..channel {
            for hw in 0..plane {
                dst[base + hw * channel + c] = src[base + c * plane + hw];
            }
        }
    }
}

/// NHWC [n][hw][c] -> NCHW [n][c][hw].
pub fn pack_nhwc_to_nchw<T: Copy>(src: &[T], dst: &mut [T], batch: usize, plane: usize, channel: usize) {
    for n in 0..batch {
        let base = n * plane * channel;
        for hw in 0..plane {
            for c in 0..channel {
                dst[base + c * plane + hw] = src[base + hw * channel + c];
            }
        }
    }
}

/// Deconvolution weight [ic][kernel_plane][oc] -> matmul layout
/// [oc8_block][kernel_plane][8][up16(ic)], deep (ic) contiguous per column.
/// Pads (ic tail and oc tail) are filled with `pad` (the weight zero-point),
/// which keeps the zero-point sum corrections exact over the padded deep dim.
pub fn pack_deconv_weight(
    src: &[i8],
    dst: &mut [i8],
    in_channel: usize,
    out_channel: usize,
    kernel_plane: usize,
    pad: i8,
) {
    let ic16 = up_round(in_channel, C16);
    let oc8_blocks = up_div(out_channel, C8);
    let total = oc8_blocks * kernel_plane * C8 * ic16;
    debug_assert!(dst.len() >= total);
    dst[..total].fill(pad);
    for o in 0..out_channel {
        let blk = o / C8;
        let rem = o % C8;
        for p in 0..kernel_plane {
            let col = (blk * kernel_plane + p) * C8 + rem;
            let d = &mut dst[col * ic16..col * ic16 + in_channel];
            for (i, dv) in d.iter_mut().enumerate() {
                *dv = src[(i * kernel_plane + p) * out_channel + o];
            }
        }
    }
}
