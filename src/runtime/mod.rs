//! Operator runtime: execution context, conv parameters, the kernel
//! lifecycle trait and the factory registry that maps op types to kernels.

pub mod arithmetic_self;
pub mod conv_winograd;
pub mod deconv_int8;

pub use arithmetic_self::ArithmeticSelfKernel;
pub use conv_winograd::WinogradConvKernel;
pub use deconv_int8::DeconvInt8Kernel;

use std::collections::HashMap;
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::KernelError;
use crate::tensor::Tensor;

/// Execution context shared by every kernel of a model: one thread pool,
/// built once and injected, never a process-wide global.
pub struct CpuContext {
    pool: ThreadPool,
    thread_count: usize,
}

impl CpuContext {
    pub fn new(thread_count: usize) -> Result<Self, KernelError> {
        let threads = thread_count.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| KernelError::Allocation(format!("thread pool: {}", e)))?;
        Ok(CpuContext {
            pool,
            thread_count: threads,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActType {
    None,
    Relu,
    Relu6,
}

/// Static convolution/deconvolution attributes, fixed at kernel creation.
#[derive(Debug, Clone)]
pub struct ConvParam {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_u: usize,
    pub pad_d: usize,
    pub pad_l: usize,
    pub pad_r: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub input_channel: usize,
    pub output_channel: usize,
    pub act: ActType,
}

/// Lifecycle position of a kernel. Weight preparation happens once at
/// `Initialized`; shape-dependent planning at `ShapeResolved`; only a
/// shape-resolved kernel may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KernelState {
    Created,
    Initialized,
    ShapeResolved,
}

/// Three-stage operator lifecycle. `init` consumes constant tensors (weights,
/// bias) and is called once; `resize` re-plans for the current activation
/// shapes and may be called again whenever shapes change; `run` executes one
/// invocation and owns no tensor memory across calls.
pub trait Kernel {
    fn init(&mut self, inputs: &[Tensor]) -> Result<(), KernelError>;
    fn resize(&mut self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<(), KernelError>;
    fn run(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<(), KernelError>;
    fn state(&self) -> KernelState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Conv2D,
    DeConv2D,
}

pub type KernelFactory = fn(ConvParam, Arc<CpuContext>) -> Box<dyn Kernel>;

/// Explicit factory table from op type to kernel constructor. Selection is a
/// plain map lookup; an unknown op type is an error, not a fallback.
pub struct KernelRegistry {
    factories: HashMap<OpType, KernelFactory>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<OpType, KernelFactory> = HashMap::new();
        factories.insert(OpType::Conv2D, |param, ctx| {
            Box::new(WinogradConvKernel::new(param, ctx))
        });
        factories.insert(OpType::DeConv2D, |param, ctx| {
            Box::new(DeconvInt8Kernel::new(param, ctx))
        });
        KernelRegistry { factories }
    }

    pub fn register(&mut self, op: OpType, factory: KernelFactory) {
        self.factories.insert(op, factory);
    }

    pub fn create(
        &self,
        op: OpType,
        param: ConvParam,
        ctx: Arc<CpuContext>,
    ) -> Result<Box<dyn Kernel>, KernelError> {
        match self.factories.get(&op) {
            Some(factory) => Ok(factory(param, ctx)),
            None => {
                log::error!("no kernel registered for {:?}", op);
                Err(KernelError::precondition(format!(
                    "no kernel registered for {:?}",
                    op
                )))
            }
        }
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        KernelRegistry::new()
    }
}

pub(crate) fn require_state(
    actual: KernelState,
    needed: KernelState,
    stage: &str,
) -> Result<(), KernelError> {
    if actual < needed {
        log::error!("{} called in state {:?}, needs {:?}", stage, actual, needed);
        return Err(KernelError::precondition(format!(
            "{} called in state {:?}, needs {:?}",
            stage, actual, needed
        )));
    }
    Ok(())
}

pub(crate) fn tensor_arg<'a>(tensors: &'a [Tensor], idx: usize, what: &str) -> Result<&'a Tensor, KernelError> {
    tensors
        .get(idx)
        .ok_or_else(|| KernelError::precondition(format!("missing {} tensor at index {}", what, idx)))
}
