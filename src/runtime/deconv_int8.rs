//! Int8 transposed-convolution kernel. The weight is packed once at init
//! into the blocked matmul layout; each run packs the activation plane,
//! multiplies it against every kernel tap and output-channel block, scatters
//! the products back onto the output plane (col2im) and requantizes the
//! accumulators to i8.

use std::sync::Arc;

use crate::error::KernelError;
use crate::kernels::deconv_int8::{col2im_block, deconv_output_size};
use crate::kernels::matmul_int8::{compute_col_sums, compute_row_sums, matmul_i8};
use crate::kernels::pack::{pack_deconv_weight, pack_row_major_to_row16x4, C16, C8};
use crate::kernels::requantize::{activation_clamp, requantize_c8_block, QuantMultiplier};
use crate::kernels::utils::{up_div, up_round};
use crate::parallel::{run_parallel, SharedSlice};
use crate::runtime::{require_state, tensor_arg, ConvParam, CpuContext, Kernel, KernelState};
use crate::tensor::{DataType, Layout, QuantParam, Tensor};

pub struct DeconvInt8Kernel {
    param: ConvParam,
    ctx: Arc<CpuContext>,
    state: KernelState,
    packed_weight: Vec<i8>,
    bias: Vec<i32>,
    weight_q: QuantParam,
    input_q: QuantParam,
    output_q: QuantParam,
    qm: QuantMultiplier,
    act_min: i32,
    act_max: i32,
    col_sums: Vec<i32>,
    batch: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
}

impl DeconvInt8Kernel {
    pub fn new(param: ConvParam, ctx: Arc<CpuContext>) -> Self {
        DeconvInt8Kernel {
            param,
            ctx,
            state: KernelState::Created,
            packed_weight: Vec::new(),
            bias: Vec::new(),
            weight_q: QuantParam { scale: 1.0, zero_point: 0 },
            input_q: QuantParam { scale: 1.0, zero_point: 0 },
            output_q: QuantParam { scale: 1.0, zero_point: 0 },
            qm: QuantMultiplier { multiplier: 0, left_shift: 0, right_shift: 0 },
            act_min: i8::MIN as i32,
            act_max: i8::MAX as i32,
            col_sums: Vec::new(),
            batch: 0,
            in_h: 0,
            in_w: 0,
            out_h: 0,
            out_w: 0,
        }
    }

    fn kernel_plane(&self) -> usize {
        self.param.kernel_h * self.param.kernel_w
    }
}

impl Kernel for DeconvInt8Kernel {
    /// inputs: [activation (ignored here), weight [ic][kh][kw][oc] i8,
    /// optional bias i32].
    fn init(&mut self, inputs: &[Tensor]) -> Result<(), KernelError> {
        let (kh, kw) = (self.param.kernel_h, self.param.kernel_w);
        let (ic, oc) = (self.param.input_channel, self.param.output_channel);
        let weight = tensor_arg(inputs, 1, "weight")?;
        if weight.dtype() != DataType::I8 {
            return Err(KernelError::precondition("deconv weight must be int8"));
        }
        let w_shape = weight.shape();
        if w_shape.len() != 4
            || w_shape[0] != ic
            || w_shape[1] != kh
            || w_shape[2] != kw
            || w_shape[3] != oc
        {
            return Err(KernelError::shape(format!(
                "weight shape {:?} does not match conv param", w_shape
            )));
        }
        weight.check_quant_params(oc)?;
        if weight.quant_params().len() > 1 {
            return Err(KernelError::precondition(
                "deconv kernel supports per-tensor weight quantization only",
            ));
        }
        self.weight_q = weight.per_tensor_quant()?;

        let kp = kh * kw;
        let ic16 = up_round(ic, C16);
        let oc8_blocks = up_div(oc, C8);
        self.packed_weight = vec![0; oc8_blocks * kp * C8 * ic16];
        pack_deconv_weight(
            weight.as_i8()?,
            &mut self.packed_weight,
            ic,
            oc,
            kp,
            self.weight_q.zero_point as i8,
        );

        self.bias.clear();
        if let Some(bias) = inputs.get(2) {
            let data = bias.as_i32()?;
            if data.len() != oc {
                return Err(KernelError::shape(format!(
                    "bias length {} does not match output channel {}",
                    data.len(),
                    oc
                )));
            }
            self.bias.extend_from_slice(data);
        }
        self.state = KernelState::Initialized;
        log::debug!(
            "deconv int8 init: kernel {}x{} stride {} oc {}",
            kh,
            kw,
            self.param.stride_h,
            oc
        );
        Ok(())
    }

    fn resize(&mut self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<(), KernelError> {
        require_state(self.state, KernelState::Initialized, "resize")?;
        let p = self.param.clone();
        if p.dilation_h != 1 || p.dilation_w != 1 {
            return Err(KernelError::shape("deconv supports dilation 1 only"));
        }
        if p.stride_h == 0 || p.stride_w == 0 {
            return Err(KernelError::shape("deconv stride must be non-zero"));
        }
        let input = tensor_arg(inputs, 0, "input")?;
        let output = tensor_arg(outputs, 0, "output")?;
        if input.shape().len() != 4 || output.shape().len() != 4 {
            return Err(KernelError::shape(format!(
                "deconv expects rank-4 activations, got input {:?} output {:?}",
                input.shape(),
                output.shape()
            )));
        }
        if input.layout() != Layout::Nhwc || input.dtype() != DataType::I8 {
            return Err(KernelError::precondition("deconv input must be NHWC int8"));
        }
        if output.dtype() != DataType::I8 {
            return Err(KernelError::precondition("deconv output must be int8"));
        }
        if input.channel() != p.input_channel {
            return Err(KernelError::shape(format!(
                "input channel {} != param channel {}",
                input.channel(),
                p.input_channel
            )));
        }
        let out_h = deconv_output_size(input.height(), p.kernel_h, p.stride_h, p.pad_u, p.pad_d);
        let out_w = deconv_output_size(input.width(), p.kernel_w, p.stride_w, p.pad_l, p.pad_r);
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

        self.input_q = input.per_tensor_quant()?;
        self.output_q = output.per_tensor_quant()?;
        self.qm = QuantMultiplier::from_scales(&self.input_q, &self.weight_q, &self.output_q);
        let (min, max) = activation_clamp(p.act, &self.output_q);
        self.act_min = min;
        self.act_max = max;

        let ic16 = up_round(p.input_channel, C16);
        let n_cols = up_div(p.output_channel, C8) * self.kernel_plane() * C8;
        self.col_sums = vec![0; n_cols];
        compute_col_sums(
            &self.packed_weight,
            &mut self.col_sums,
            n_cols,
            ic16,
            self.input_q.zero_point,
            self.weight_q.zero_point,
        );

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
        let ic = p.input_channel;
        let oc = p.output_channel;
        let kp = self.kernel_plane();
        let ic16 = up_round(ic, C16);
        let oc8_blocks = up_div(oc, C8);
        let (in_h, in_w, out_h, out_w) = (self.in_h, self.in_w, self.out_h, self.out_w);
        let in_plane = in_h * in_w;
        let out_plane = out_h * out_w;

        let src = tensor_arg(inputs, 0, "input")?.as_i8()?;
        if src.len() < self.batch * in_plane * ic {
            return Err(KernelError::precondition("input buffer shorter than its shape"));
        }
        let output = tensor_arg(outputs, 0, "output")?;
        if output.element_count() != self.batch * out_plane * oc {
            return Err(KernelError::shape("output tensor does not match resolved shape"));
        }
        let dst = outputs[0].as_i8_mut()?;
        let shared = SharedSlice::new(dst);

        let packed_weight = &self.packed_weight;
        let col_sums = &self.col_sums;
        let bias = if self.bias.is_empty() { None } else { Some(self.bias.as_slice()) };
        let (qm, out_zp) = (self.qm, self.output_q.zero_point);
        let (act_min, act_max) = (self.act_min, self.act_max);
        let (input_zp, weight_zp) = (self.input_q.zero_point, self.weight_q.zero_point);
        let thread_count = self.ctx.thread_count();

        // per-run scratch, freed when the call returns
        let mut packed_a = vec![0i8; up_round(in_plane, 4) * ic16];
        let mut row_sums = vec![0i32; in_plane];

        for b in 0..self.batch {
            pack_row_major_to_row16x4(
                &src[b * in_plane * ic..(b + 1) * in_plane * ic],
                &mut packed_a,
                in_plane,
                ic,
                input_zp as i8,
            );
            compute_row_sums(&packed_a, &mut row_sums, in_plane, ic16, weight_zp);

            let packed_a = &packed_a;
            let row_sums = &row_sums;
            run_parallel(self.ctx.pool(), oc8_blocks, thread_count, |_task_id, range| {
                let mut tmp = vec![0i32; in_plane * kp * C8];
                let mut acc = vec![0i32; out_plane * C8];
                // blocks write disjoint channel lanes of the shared output
                let out = unsafe {
                    shared.slice_mut(b * out_plane * oc..(b + 1) * out_plane * oc)
                };
                for blk in range {
                    matmul_i8(
                        packed_a,
                        &packed_weight[blk * kp * C8 * ic16..(blk + 1) * kp * C8 * ic16],
                        row_sums,
                        &col_sums[blk * kp * C8..(blk + 1) * kp * C8],
                        in_plane,
                        kp * C8,
                        ic,
                        &mut tmp,
                    )?;
                    acc.fill(0);
                    col2im_block(
                        &tmp, &mut acc, in_h, in_w, out_h, out_w, p.kernel_h, p.kernel_w,
                        p.stride_h, p.stride_w, p.pad_u, p.pad_l,
                    );
                    let oc_base = blk * C8;
                    requantize_c8_block(
                        &acc,
                        out,
                        bias,
                        out_plane,
                        oc,
                        oc_base,
                        C8.min(oc - oc_base),
                        &qm,
                        out_zp,
                        act_min,
                        act_max,
                    );
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn state(&self) -> KernelState {
        self.state
    }
}
