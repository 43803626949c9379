//! Common error types for the VIP responder components.

use std::fmt;

/// A specialized Result type for responder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for responder operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("interface error: {0}")]
    Interface(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new invalid-address error.
    pub fn invalid_address(msg: impl fmt::Display) -> Self {
        Error::InvalidAddress(msg.to_string())
    }

    /// Create a new interface error.
    pub fn interface(msg: impl fmt::Display) -> Self {
        Error::Interface(msg.to_string())
    }

    /// Create a new socket error.
    pub fn socket(msg: impl fmt::Display) -> Self {
        Error::Socket(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
