//! Error types for the manager-protocol client

use std::time::Duration;

use thiserror::Error;

/// Result type for manager-protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the manager-protocol transport and client
#[derive(Debug, Error)]
pub enum Error {
    /// TCP connect/read/write failure
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Login rejected by the manager interface
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A response could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response or completion sentinel within the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn not_connected() -> Self {
        Error::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "not connected to the manager interface",
        ))
    }
}
