//! Transposed-convolution (deconvolution) int8 building blocks. The kernel
//! runs deconvolution as a plain matmul over the input plane followed by a
//! col2im scatter-add into C8-blocked accumulators; requantization happens
//! once per output element after accumulation.

use crate::kernels::pack::C8;

/// Output extent along one axis: (in - 1) * stride + kernel - pad_front - pad_back.
pub fn deconv_output_size(input: usize, kernel: usize, stride: usize, pad_front: usize, pad_back: usize) -> usize {
    ((input.max(1) - 1) * stride + kernel).saturating_sub(pad_front + pad_back)
}

/// Scatter-adds one oc8 block's matmul output into its spatial accumulator.
///
/// `tmp` is row-major [in_h*in_w][kernel_h*kernel_w*8] with the kernel tap as
/// the middle index, the layout the packed deconv weight produces. `acc` is
/// [out_h*out_w][8] and must be zeroed by the caller before the first call.
/// Taps landing outside the output (negative or past the edge after padding)
/// are dropped.
#[allow(clippy::too_many_arguments)]
pub fn col2im_block(
    tmp: &[i32],
    acc: &mut [i32],
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_u: usize,
    pad_l: usize,
) {
    let kernel_plane = kernel_h * kernel_w;
    for iy in 0..in_h {
        for ix in 0..in_w {
            let src_row = (iy * in_w + ix) * kernel_plane * C8;
            for ky in 0..kernel_h {
                let oy = (iy * stride_h + ky) as isize - pad_u as isize;
                if oy < 0 || oy as usize >= out_h {
                    continue;
                }
                for kx in 0..kernel_w {
                    let ox = (ix * stride_w + kx) as isize - pad_l as isize;
                    if ox < 0 || ox as usize >= out_w {
                        continue;
                    }
                    let src = src_row + (ky * kernel_w + kx) * C8;
                    let dst = (oy as usize * out_w + ox as usize) * C8;
                    for r in 0..C8 {
                        acc[dst + r] += tmp[src + r];
                    }
                }
            }
        }
    }
}
