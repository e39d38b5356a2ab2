//! DSP error types

use thiserror::Error;
use tm_core::{Classify, ErrorKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DspError {
    #[error("Invalid filter config: {0}")]
    InvalidConfig(String),

    #[error("Channel count mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("Channel buffers differ in length")]
    LengthMismatch,
}

pub type DspResult<T> = Result<T, DspError>;

impl Classify for DspError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
