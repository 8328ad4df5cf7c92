use crate::layout::{DataType, Format};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Unsupported format combination {input:?} -> {output:?}: {reason}")]
    UnsupportedFormat {
        input: Format,
        output: Format,
        reason: &'static str,
    },
    #[error("Unsupported data type: expected {expected:?}, found {found:?}")]
    UnsupportedDataType { expected: DataType, found: DataType },
    #[error("Invalid blocking: {0}")]
    Blocking(String),
    #[error("No micro-kernel for tile width {width} (max {max})")]
    UnsupportedTile { width: usize, max: usize },
    #[error("Buffer size mismatch for {what}: expected {expected}, found {found}")]
    BufferSize {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Invalid quantization scale tensor: {0}")]
    ScaleTensor(String),
    #[error("Thread pool error")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, ConvError>;

pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(ConvError::BufferSize {
            what,
            expected,
            found,
        });
    }
    Ok(())
}
