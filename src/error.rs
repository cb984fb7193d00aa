//! Error types for the CDC source
//!
//! The taxonomy mirrors how failures propagate: configuration errors are
//! fatal at startup, connection errors are retried with bounded backoff
//! inside a worker, consistency and protocol errors fail the chunk fast.

use thiserror::Error;

/// Errors raised by the CDC source.
#[derive(Error, Debug)]
pub enum CdcError {
    /// Invalid configuration. Fatal at startup, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection failure. Retried with bounded backoff.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection closed by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake or query exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The normalizer or a reader observed state that violates the
    /// consistency protocol (e.g. DELETE of an unknown key inside a chunk
    /// window, missing watermark frame). Fails the chunk.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Unexpected event ordering or shape from the log stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Schema discovery or capture failure.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Checkpoint state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A component was driven outside its lifecycle.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CdcError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new consistency error
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry. A chunk
    /// read is retried on these up to the configured budget; everything else
    /// surfaces as a chunk failure immediately.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ConnectionClosed | Self::Timeout(_) => true,

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Config(_)
            | Self::Consistency(_)
            | Self::Protocol(_)
            | Self::Schema(_)
            | Self::Serialization(_)
            | Self::Json(_)
            | Self::InvalidState(_) => false,
        }
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdcError::consistency("delete of unknown key id=2");
        assert!(err.to_string().contains("Consistency error"));
        assert!(err.to_string().contains("id=2"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(CdcError::connection("refused").is_retriable());
        assert!(CdcError::ConnectionClosed.is_retriable());
        assert!(CdcError::timeout("30s").is_retriable());

        assert!(!CdcError::config("bad server-id").is_retriable());
        assert!(!CdcError::consistency("x").is_retriable());
        assert!(!CdcError::protocol("x").is_retriable());
        assert!(!CdcError::schema("x").is_retriable());
    }

    #[test]
    fn test_io_error_classification() {
        let reset = CdcError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(reset.is_retriable());

        let not_found = CdcError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(!not_found.is_retriable());
    }
}
