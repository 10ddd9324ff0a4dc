//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A socket-api call had malformed arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An election document failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] undebate_proto::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
