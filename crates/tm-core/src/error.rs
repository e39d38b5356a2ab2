//! Error kinds shared by all TrackMix crates

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of every error the engine reports.
///
/// Control-thread callers branch on the kind (retry a timeout, fix a
/// validation error) and show the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad parameter counts, out-of-range indices, malformed ramp lengths
    Validation,
    /// File, shared memory or process could not be acquired
    Resource,
    /// A bounded wait expired
    Timeout,
    /// Raised inside the audio callback and surfaced later
    Async,
    /// Operation not allowed in the current state
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Async => "async",
            ErrorKind::State => "state",
        };
        f.write_str(name)
    }
}

/// Kind + message pair handed to the control layer
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors that can be classified into an [`ErrorKind`]
pub trait Classify: std::error::Error {
    fn kind(&self) -> ErrorKind;

    fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}
