//! Audio error types

use thiserror::Error;
use tm_core::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Invalid device config: {0}")]
    ConfigError(String),

    #[error("Device already running")]
    AlreadyRunning,

    #[error("Failed to spawn audio thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("Audio thread panicked")]
    ThreadPanicked,
}

pub type AudioResult<T> = Result<T, AudioError>;

impl Classify for AudioError {
    fn kind(&self) -> ErrorKind {
        match self {
            AudioError::ConfigError(_) => ErrorKind::Validation,
            AudioError::AlreadyRunning => ErrorKind::State,
            AudioError::ThreadSpawn(_) | AudioError::ThreadPanicked => ErrorKind::Resource,
        }
    }
}
