//! Errors raised while building or executing a two-party computation.
use thiserror::Error;

use crate::channel::ConnectionError;

/// A custom error type for all operations of a [`crate::party::Party`].
#[derive(Debug, Error)]
pub enum Error {
    /// A message could not be sent or received, or the peer could not be reached.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The peer sent data that does not fit the agreed circuit, or the circuit
    /// itself is malformed (mismatching widths, misplaced gates, ...).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The requested gate is not available in the chosen sharing.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// A cryptographic primitive was used with invalid parameters.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// The party configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// An exported circuit could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub(crate) fn unsupported(op: &str, sharing: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperation(format!("{op} is not supported in {sharing} sharing"))
    }
}
