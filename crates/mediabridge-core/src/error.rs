//! Error types for MediaBridge Core

use crate::types::HandleKind;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
///
/// Only synchronous failures are errors. Terminal parse results
/// (`Done`, `Failed`, `Timeout`, `Cancelled`) are [`crate::ParseOutcome`]
/// values and never travel through this type.
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} handle has been released")]
    Disposed { kind: HandleKind },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Native engine errors
    #[error("Native engine error: {0}")]
    Native(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a native engine error
    pub fn native(msg: impl Into<String>) -> Self {
        Error::Native(msg.into())
    }

    /// Returns true if the caller can fix this error by changing its input
    /// or call order. Native failures are not caller errors.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::Disposed { .. }
                | Error::InvalidState(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Returns the error code for logs and host bindings
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Disposed { .. } => "DISPOSED",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Native(_) => "NATIVE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}
