//! Elementwise fp32 kernel: one scalar map over the whole activation,
//! partitioned across the pool by flat element ranges. There are no constant
//! tensors, so init only advances the lifecycle.

use std::sync::Arc;

use crate::error::KernelError;
use crate::kernels::elementwise::{apply_unary, UnaryOp};
use crate::parallel::{run_parallel, SharedSlice};
use crate::runtime::{require_state, tensor_arg, CpuContext, Kernel, KernelState};
use crate::tensor::{DataType, Tensor};

pub struct ArithmeticSelfKernel {
    op: UnaryOp,
    ctx: Arc<CpuContext>,
    state: KernelState,
    element_count: usize,
}

impl ArithmeticSelfKernel {
    pub fn new(op: UnaryOp, ctx: Arc<CpuContext>) -> Self {
        ArithmeticSelfKernel {
            op,
            ctx,
            state: KernelState::Created,
            element_count: 0,
        }
    }
}

impl Kernel for ArithmeticSelfKernel {
    fn init(&mut self, _inputs: &[Tensor]) -> Result<(), KernelError> {
        self.state = KernelState::Initialized;
        Ok(())
    }

    /// Input and output must be f32 with identical shapes; any rank works,
    /// the map is over the flat buffer.
    fn resize(&mut self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<(), KernelError> {
        require_state(self.state, KernelState::Initialized, "resize")?;
        let input = tensor_arg(inputs, 0, "input")?;
        let output = tensor_arg(outputs, 0, "output")?;
        if input.dtype() != DataType::F32 || output.dtype() != DataType::F32 {
            return Err(KernelError::precondition(
                "elementwise tensors must be f32",
            ));
        }
        if input.shape() != output.shape() {
            return Err(KernelError::shape(format!(
                "elementwise output shape {:?} != input shape {:?}",
                output.shape(),
                input.shape()
            )));
        }
        self.element_count = input.element_count();
        self.state = KernelState::ShapeResolved;
        Ok(())
    }

    fn run(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<(), KernelError> {
        require_state(self.state, KernelState::ShapeResolved, "run")?;
        let src = tensor_arg(inputs, 0, "input")?.as_f32()?;
        if src.len() != self.element_count {
            return Err(KernelError::shape(
                "input tensor does not match resolved shape",
            ));
        }
        let output = tensor_arg(outputs, 0, "output")?;
        if output.element_count() != self.element_count {
            return Err(KernelError::shape(
                "output tensor does not match resolved shape",
            ));
        }
        let dst = outputs[0].as_f32_mut()?;
        let shared = SharedSlice::new(dst);
        let op = self.op;
        // no point spinning up more tasks than elements
        let threads = self.ctx.thread_count().min(self.element_count).max(1);
        run_parallel(self.ctx.pool(), self.element_count, threads, |_task_id, range| {
            let out = unsafe { shared.slice_mut(range.clone()) };
            apply_unary(op, &src[range], out);
            Ok(())
        })
    }

    fn state(&self) -> KernelState {
        self.state
    }
}
