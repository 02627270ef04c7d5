//! Unified error handling for the volley crate
//!
//! Domain-specific errors live next to their modules (see
//! [`crate::utils::error`]); this module consolidates them into a single
//! [`Error`] enum for use across module boundaries, together with a
//! category and recoverability classification.

use std::io;
use thiserror::Error;

pub use crate::utils::error::{LeaseError, SessionError, TransportError};

/// Common interface implemented by the unified error type
pub trait VolleyErrorTrait: std::error::Error {
    /// Check if this error is recoverable (worth retrying)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (gateway, timeout, rate limit)
    Network,
    /// Session/credential errors
    Session,
    /// Storage and I/O errors
    Storage,
    /// Job orchestration errors
    Dispatch,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the volley crate
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors from the gateway
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session catalog errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Connection lease errors
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl VolleyErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(
                e,
                TransportError::FloodWait(_)
                    | TransportError::PeerFlood
                    | TransportError::Timeout
                    | TransportError::Http(_)
            ),
            Self::Session(_) => false,
            Self::Lease(e) => matches!(e, LeaseError::Unreachable { .. }),
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Network,
            Self::Session(_) => ErrorCategory::Session,
            Self::Lease(LeaseError::SessionInvalid(_)) => ErrorCategory::Session,
            Self::Lease(_) => ErrorCategory::Network,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_category() {
        let err = Error::Transport(TransportError::Timeout);
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = Error::Session(SessionError::Corrupted("acc1".into()));
        assert_eq!(err.category(), ErrorCategory::Session);

        let err = Error::Lease(LeaseError::SessionInvalid("acc1".into()));
        assert_eq!(err.category(), ErrorCategory::Session);
    }

    #[test]
    fn test_is_recoverable() {
        let transient = Error::Transport(TransportError::FloodWait(Duration::from_secs(5)));
        assert!(transient.is_recoverable());

        let fatal = Error::Transport(TransportError::Blocked);
        assert!(!fatal.is_recoverable());

        let corrupt = Error::Session(SessionError::Corrupted("acc1".into()));
        assert!(!corrupt.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("bad delay range");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }
}
