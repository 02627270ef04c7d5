//! Error types for the volley dispatch engine
//!
//! This module defines the domain errors raised at the network and session
//! boundaries. Classification into send outcomes happens in the sender.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a live connection while talking to the messaging network
#[derive(Error, Debug)]
pub enum TransportError {
    /// The sender identity is permanently banned by the network
    #[error("account is banned by the network")]
    Blocked,

    /// The recipient's privacy settings reject this sender
    #[error("recipient privacy settings reject the sender")]
    PrivacyRestricted,

    /// The network requires a prior bidirectional relationship
    #[error("recipient requires a mutual contact")]
    MutualContactRequired,

    /// The network signalled backoff with an explicit wait
    #[error("rate limited, retry after {0:?}")]
    FloodWait(Duration),

    /// The network signalled a broad sending restriction
    #[error("peer flood restriction")]
    PeerFlood,

    /// The recipient identifier is invalid or deleted
    #[error("recipient not found: {0}")]
    TargetNotFound(String),

    /// Connection attempt did not complete within the bound
    #[error("connection timed out")]
    Timeout,

    /// HTTP-level failure from the gateway client
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway responded with an unexpected status or payload
    #[error("gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },
}

/// Errors raised by the session catalog
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session data exists for the account
    #[error("no session for account {0}")]
    Missing(String),

    /// Session data exists but fails integrity checks
    #[error("session data for account {0} is corrupt")]
    Corrupted(String),

    /// Underlying I/O failure reading session data
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while leasing a connection for an account
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Session data unreadable or corrupt; the account must be retired
    #[error("session invalid for account {0}")]
    SessionInvalid(String),

    /// Both the proxied and the direct path failed
    #[error("account {account_id} unreachable: {source}")]
    Unreachable {
        account_id: String,
        #[source]
        source: TransportError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flood_wait_display() {
        let err = TransportError::FloodWait(Duration::from_secs(42));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_lease_error_source() {
        let err = LeaseError::Unreachable {
            account_id: "acc1".into(),
            source: TransportError::Timeout,
        };
        assert!(err.to_string().contains("acc1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
