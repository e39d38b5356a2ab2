//! File I/O error types

use thiserror::Error;
use tm_core::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    WavError(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Channel {channel} out of range (source has {channels})")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("Writer not open: {0}")]
    NotOpen(String),
}

pub type FileResult<T> = Result<T, FileError>;

impl From<hound::Error> for FileError {
    fn from(err: hound::Error) -> Self {
        FileError::WavError(err.to_string())
    }
}

impl Classify for FileError {
    fn kind(&self) -> ErrorKind {
        match self {
            FileError::Io(_) | FileError::WavError(_) => ErrorKind::Resource,
            FileError::InvalidFile(_) | FileError::ChannelOutOfRange { .. } => {
                ErrorKind::Validation
            }
            FileError::NotOpen(_) => ErrorKind::State,
        }
    }
}
