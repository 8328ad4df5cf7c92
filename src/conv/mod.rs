pub mod combine;
pub mod compact;
pub mod direct;
pub mod partition;
pub mod wino_gemm;
pub use compact::{PackState, PackedWeights};
pub use direct::DirectConv;
pub use partition::{IterSpace, Partitioner};
pub use wino_gemm::{Scramble, SrcSample, WinoGemm};
