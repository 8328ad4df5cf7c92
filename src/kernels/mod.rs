pub mod activations;
pub mod attr;
#[cfg(target_arch = "x86_64")]
pub mod avx;
pub mod direct;
pub mod dispatch;
#[cfg(target_arch = "aarch64")]
pub mod neon;
pub mod u8s8_gemm;
pub mod utils;
pub use activations::Activation;
pub use attr::KernelAttr;
pub use direct::{DirectCall, DirectKernelFn};
pub use dispatch::{DirectKernels, GemmKernels, SimdLevel, MAX_DIRECT_TILE, MAX_GEMM_TILE};
pub use u8s8_gemm::{GemmCall, GemmKernelFn, SrcTile};
