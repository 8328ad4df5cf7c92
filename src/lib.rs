//! Blocked-layout, multi-threaded CPU convolution for inference.
//!
//! [`DirectConv`] runs direct convolution over blocked, channel-last or
//! channel-first activations; [`WinoGemm`] is the int8 GEMM stage of a
//! Winograd convolution together with its dequantization epilogue.

pub mod conv;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod params;
pub mod quantization;
pub mod reference;
pub mod reorder;
pub mod stats;
pub mod tensor;

pub use conv::{DirectConv, PackState, Scramble, SrcSample, WinoGemm};
pub use error::{ConvError, Result};
pub use kernels::activations::Activation;
pub use layout::{ActLayout, DataType, Format, WeightFormat, WeightLayout};
pub use params::{Algorithm, ConvDesc, ConvParams, WinoGemmDesc, WinoGemmParams};
pub use quantization::SamplingKind;
pub use stats::{ExecStats, StatsSnapshot};
pub use tensor::{Element, TensorView, TensorViewMut};
