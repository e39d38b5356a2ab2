//! Bridge error types

use std::time::Duration;

use thiserror::Error;
use tm_core::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shared region error: {0}")]
    Region(String),

    #[error("Invalid layout: {0}")]
    Layout(String),

    #[error("Failed to start external process: {0}")]
    SpawnFailed(String),

    #[error("Protocol error during startup: {0}")]
    Protocol(String),

    #[error("External process did not signal init within {0:?}")]
    StartTimeout(Duration),

    #[error("External process did not answer within {0:?}")]
    ExchangeTimeout(Duration),

    #[error("External processing error: {0}")]
    Remote(String),

    #[error("Bridge not ready (state {0:?})")]
    NotReady(crate::BridgeState),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::StartTimeout(_) | BridgeError::ExchangeTimeout(_))
    }
}

impl Classify for BridgeError {
    fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Io(_)
            | BridgeError::Region(_)
            | BridgeError::SpawnFailed(_)
            | BridgeError::Protocol(_)
            | BridgeError::Remote(_) => ErrorKind::Resource,
            BridgeError::Layout(_) => ErrorKind::Validation,
            BridgeError::StartTimeout(_) | BridgeError::ExchangeTimeout(_) => ErrorKind::Timeout,
            BridgeError::NotReady(_) => ErrorKind::State,
        }
    }
}
