//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A subscribe argument has the wrong shape. Raised before anything is
    /// registered or sent.
    #[error("invalid argument `{parameter}`: expected {expected}, got {actual}")]
    InvalidArgument {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// What the parameter must be.
        expected: &'static str,
        /// What was observed instead.
        actual: String,
    },

    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] undebate_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}

impl Error {
    /// Build an `InvalidArgument` for a parameter that must be a handler.
    pub(crate) fn not_a_handler(parameter: &'static str, actual: impl Into<String>) -> Self {
        Error::InvalidArgument {
            parameter,
            expected: "a function",
            actual: actual.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_message_names_parameter_and_type() {
        let err = Error::not_a_handler("result_handler", "string");
        let message = err.to_string();
        assert!(message.contains("result_handler"));
        assert!(message.contains("string"));
    }
}
