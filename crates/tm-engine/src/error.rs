//! Engine error types

use std::time::Duration;

use thiserror::Error;
use tm_audio::AudioError;
use tm_bridge::BridgeError;
use tm_core::{ChannelClass, Classify, ErrorKind};
use tm_file::FileError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("{} {index} out of range ({count} available)", .class.name())]
    OutOfRange {
        class: ChannelClass,
        index: usize,
        count: usize,
    },

    #[error("Ramp length {ramp} exceeds playable length {playable}")]
    RampTooLong { ramp: u64, playable: u64 },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Not allowed while recording: {0}")]
    Busy(String),

    #[error("Engine not running")]
    NotRunning,

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Wait timed out after {0:?}")]
    WaitTimeout(Duration),

    #[error("Asynchronous error: {0}")]
    Async(String),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn out_of_range(class: ChannelClass, index: usize, count: usize) -> Self {
        EngineError::OutOfRange {
            class,
            index,
            count,
        }
    }
}

impl Classify for EngineError {
    fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidParam(_)
            | EngineError::OutOfRange { .. }
            | EngineError::RampTooLong { .. }
            | EngineError::Config(_) => ErrorKind::Validation,
            EngineError::Busy(_) | EngineError::NotRunning | EngineError::AlreadyRunning => {
                ErrorKind::State
            }
            EngineError::WaitTimeout(_) => ErrorKind::Timeout,
            EngineError::Async(_) => ErrorKind::Async,
            EngineError::File(e) => e.kind(),
            EngineError::Audio(e) => e.kind(),
            EngineError::Bridge(e) => e.kind(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
