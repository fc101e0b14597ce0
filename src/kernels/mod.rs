pub mod deconv_int8;
pub mod elementwise;
pub mod gemm;
pub mod matmul_int8;
pub mod pack;
pub mod requantize;
pub mod utils;
pub mod winograd;
pub use deconv_int8::{col2im_block, deconv_output_size};
pub use elementwise::{apply_unary, UnaryOp};
pub use gemm::matmul_f32;
pub use matmul_int8::{compute_col_sums, compute_row_sums, matmul_i8};
pub use pack::*;
pub use requantize::{
    activation_clamp, multiply_by_quantized_multiplier, requantize_c8, requantize_per_channel,
    rounding_divide_by_pot, saturating_rounding_doubling_high_mul, QuantMultiplier,
};
pub use winograd::{cook_toom_matrices, transform_weights, WinogradMatrices};
