//! CPU operator-execution kernels for neural-network inference: fp32
//! Winograd convolution, an int8 transposed-convolution pipeline
//! (pack / matmul / col2im / requantize), layout packers and a
//! partitioned parallel runner, behind a three-stage kernel lifecycle.

pub mod error;
pub mod kernels;
pub mod parallel;
pub mod runtime;
pub mod tensor;

pub use error::KernelError;
pub use kernels::*;
pub use tensor::{DataType, Layout, QuantParam, Tensor, TensorView};
