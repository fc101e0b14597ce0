//! Winograd fp32 convolution kernel. Weights are transformed once at init;
//! each run gathers input tiles, pushes them through B^T d B, multiplies the
//! transformed tiles against the pre-transformed weights point by point, and
//! folds the result back through A^T m A with bias and activation applied in
//! the spatial domain.

use std::sync::Arc;

use crate::error::KernelError;
use crate::kernels::gemm::matmul_f32;
use crate::kernels::utils::{up_div, up_round};
use crate::kernels::winograd::{
    cook_toom_matrices, transform_input_tile, transform_output_tile, transform_weights,
    transformed_weight_len, WinogradMatrices,
};
use crate::parallel::{run_parallel, SharedSlice};
use crate::runtime::{require_state, tensor_arg, ActType, ConvParam, CpuContext, Kernel, KernelState};
use crate::tensor::{DataType, Layout, Tensor};

/// Output-tile edge. 4 together with a 3x3 or 5x5 kernel keeps the input unit
/// at or below 8, the largest unit with a supported interpolation point set.
const OUTPUT_UNIT: usize = 4;
const OC_BLOCK: usize = 8;

pub struct WinogradConvKernel {
    param: ConvParam,
    ctx: Arc<CpuContext>,
    state: KernelState,
    output_unit: usize,
    mats: Option<WinogradMatrices>,
    trans_weight: Vec<f32>,
    bias: Vec<f32>,
    batch: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
}

impl WinogradConvKernel {
    pub fn new(param: ConvParam, ctx: Arc<CpuContext>) -> Self {
        WinogradConvKernel {
            param,
            ctx,
            state: KernelState::Created,
            output_unit: OUTPUT_UNIT,
            mats: None,
            trans_weight: Vec::new(),
            bias: Vec::new(),
            batch: 0,
            in_h: 0,
            in_w: 0,
            out_h: 0,
            out_w: 0,
        }
    }

    fn mats(&self) -> Result<&WinogradMatrices, KernelError> {
        self.mats
            .as_ref()
            .ok_or_else(|| KernelError::precondition("kernel not initialized"))
    }
}

impl Kernel for WinogradConvKernel {
    /// inputs: [activation (ignored here), weight OHWI f32, optional bias f32].
    fn init(&mut self, inputs: &[Tensor]) -> Result<(), KernelError> {
        let (kh, kw) = (self.param.kernel_h, self.param.kernel_w);
        let (ic, oc) = (self.param.input_channel, self.param.output_channel);
        if kh != kw {
            return Err(KernelError::shape(format!(
                "winograd needs a square kernel, got {}x{}",
                kh, kw
            )));
        }
        let input_unit = self.output_unit + kh - 1;
        let coef = if input_unit == 8 { 0.5 } else { 1.0 };
        let mats = cook_toom_matrices(self.output_unit, kh, coef)?;

        let weight = tensor_arg(inputs, 1, "weight")?;
        if weight.dtype() != DataType::F32 {
            return Err(KernelError::precondition("winograd weight must be f32"));
        }
        let w_shape = weight.shape();
        if w_shape.len() != 4
            || w_shape[0] != oc
            || w_shape[1] != kh
            || w_shape[2] != kw
            || w_shape[3] != ic
        {
            return Err(KernelError::shape(format!(
                "weight shape {:?} does not match conv param", w_shape
            )));
        }
        self.trans_weight = vec![0.0; transformed_weight_len(&mats, ic, oc, OC_BLOCK)];
        transform_weights(weight.as_f32()?, oc, ic, &mats, OC_BLOCK, &mut self.trans_weight)?;

        self.bias.clear();
        if let Some(bias) = inputs.get(2) {
            let data = bias.as_f32()?;
            if data.len() != oc {
                return Err(KernelError::shape(format!(
                    "bias length {} does not match output channel {}",
                    data.len(),
                    oc
                )));
            }
            self.bias.extend_from_slice(data);
        }

        self.mats = Some(mats);
        self.state = KernelState::Initialized;
        log::debug!(
            "winograd conv init: kernel {} input_unit {} oc {}",
            kh,
            input_unit,
            oc
        );
        Ok(())
    }

    /// Re-plans output geometry for the current activation shape. Idempotent;
    /// a failed resize leaves the previously resolved shape usable.
    fn resize(&mut self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<(), KernelError> {
        require_state(self.state, KernelState::Initialized, "resize")?;
        let p = &self.param;
        if p.stride_h != 1 || p.stride_w != 1 || p.dilation_h != 1 || p.dilation_w != 1 {
            return Err(KernelError::shape(
                "winograd conv supports stride 1 and dilation 1 only",
            ));
        }
        let input = tensor_arg(inputs, 0, "input")?;
        let output = tensor_arg(outputs, 0, "output")?;
        if input.shape().len() != 4 || output.shape().len() != 4 {
            return Err(KernelError::shape(format!(
                "conv expects rank-4 activations, got input {:?} output {:?}",
                input.shape(),
                output.shape()
            )));
        }
        if input.layout() != Layout::Nhwc || input.dtype() != DataType::F32 {
            return Err(KernelError::precondition("winograd input must be NHWC f32"));
        }
        if input.channel() != p.input_channel {
            return Err(KernelError::shape(format!(
                "input channel {} != param channel {}",
                input.channel(),
                p.input_channel
            )));
        }
        let out_h = (input.height() + p.pad_u + p.pad_d + 1).checked_sub(p.kernel_h).ok_or_else(
            || KernelError::shape("padded input smaller than kernel"),
        )?;
        let out_w = (input.width() + p.pad_l + p.pad_r + 1).checked_sub(p.kernel_w).ok_or_else(
            || KernelError::shape("padded input smaller than kernel"),
        )?;
        if output.height() != out_h
            || output.width() != out_w
            || output.channel() != p.output_channel
            || output.batch() != input.batch()
        {
            return Err(KernelError::shape(format!(
                "output shape {:?} inconsistent with input {:?}",
                output.shape(),
                input.shape()
            )));
        }
        self.batch = input.batch();
        self.in_h = input.height();
        self.in_w = input.width();
        self.out_h = out_h;
        self.out_w = out_w;
        self.state = KernelState::ShapeResolved;
        Ok(())
    }

    fn run(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<(), KernelError> {
        require_state(self.state, KernelState::ShapeResolved, "run")?;
        let p = self.param.clone();
        let mats = self.mats()?.clone();
        let iu = mats.input_unit;
        let ou = self.output_unit;
        let ic = p.input_channel;
        let oc = p.output_channel;
        let oc_r = up_round(oc, OC_BLOCK);

        let (batch, in_h, in_w, out_h, out_w) =
            (self.batch, self.in_h, self.in_w, self.out_h, self.out_w);
        let tiles_h = up_div(out_h, ou);
        let tiles_w = up_div(out_w, ou);
        let tiles_per_batch = tiles_h * tiles_w;
        let total_tiles = batch * tiles_per_batch;

        let src = tensor_arg(inputs, 0, "input")?.as_f32()?;
        let output = tensor_arg(outputs, 0, "output")?;
        if output.element_count() != batch * out_h * out_w * oc {
            return Err(KernelError::shape("output tensor does not match resolved shape"));
        }
        let dst = outputs[0].as_f32_mut()?;
        let shared = SharedSlice::new(dst);

        let trans_weight = &self.trans_weight;
        let bias = &self.bias;
        let thread_count = self.ctx.thread_count();
        run_parallel(self.ctx.pool(), total_tiles, thread_count, |_task_id, range| {
            // per-task scratch, released when the task returns
            let mut d = vec![0.0f32; iu * iu];
            let mut tmp = vec![0.0f32; iu * iu];
            let mut v = vec![0.0f32; iu * iu];
            let mut trans_in = vec![0.0f32; iu * iu * ic];
            let mut gemm_out = vec![0.0f32; iu * iu * oc_r];
            let mut m_tile = vec![0.0f32; iu * iu];
            let mut out_tmp = vec![0.0f32; ou * iu];
            let mut out_tile = vec![0.0f32; ou * ou];
            // tiles write disjoint spatial regions of the shared output
            let out = unsafe { shared.slice_mut(0..shared.len()) };

            for t in range {
                let b = t / tiles_per_batch;
                let th = (t % tiles_per_batch) / tiles_w;
                let tw = t % tiles_w;
                let oy0 = th * ou;
                let ox0 = tw * ou;
                let iy0 = oy0 as isize - p.pad_u as isize;
                let ix0 = ox0 as isize - p.pad_l as isize;

                // gather + input transform, one channel at a time
                for c in 0..ic {
                    for y in 0..iu {
                        let iy = iy0 + y as isize;
                        for x in 0..iu {
                            let ix = ix0 + x as isize;
                            d[y * iu + x] = if iy >= 0
                                && (iy as usize) < in_h
                                && ix >= 0
                                && (ix as usize) < in_w
                            {
                                src[((b * in_h + iy as usize) * in_w + ix as usize) * ic + c]
                            } else {
                                0.0
                            };
                        }
                    }
                    transform_input_tile(&d, &mats, &mut v, &mut tmp);
                    for point in 0..iu * iu {
                        trans_in[point * ic + c] = v[point];
                    }
                }

                // per-point 1 x ic x oc_r multiply against transformed weights
                for point in 0..iu * iu {
                    matmul_f32(
                        1,
                        ic,
                        oc_r,
                        &trans_in[point * ic..(point + 1) * ic],
                        &trans_weight[point * ic * oc_r..(point + 1) * ic * oc_r],
                        &mut gemm_out[point * oc_r..(point + 1) * oc_r],
                    );
                }

                // output transform, bias and activation per output channel
                for o in 0..oc {
                    for point in 0..iu * iu {
                        m_tile[point] = gemm_out[point * oc_r + o];
                    }
                    transform_output_tile(&m_tile, &mats, &mut out_tile, &mut out_tmp);
                    let b_val = bias.get(o).copied().unwrap_or(0.0);
                    for y in 0..ou {
                        let oy = oy0 + y;
                        if oy >= out_h {
                            break;
                        }
                        for x in 0..ou {
                            let ox = ox0 + x;
                            if ox >= out_w {
                                break;
                            }
                            let mut val = out_tile[y * ou + x] + b_val;
                            val = match p.act {
                                ActType::None => val,
                                ActType::Relu => val.max(0.0),
                                ActType::Relu6 => val.clamp(0.0, 6.0),
                            };
                            out[((b * out_h + oy) * out_w + ox) * oc + o] = val;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn state(&self) -> KernelState {
        self.state
    }
}
