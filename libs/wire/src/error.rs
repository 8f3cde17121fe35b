//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Errors that can occur when handling wire payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The payload could not be decoded into the expected message.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A node id is empty or would break the topic namespace.
    #[error("invalid node id {value:?}: {reason}")]
    InvalidNodeId { value: String, reason: &'static str },

    /// A status that must not leave the node was handed to an envelope.
    #[error("status {0} is not reportable")]
    UnreportableStatus(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            WireError::Malformed(err.to_string())
        } else {
            WireError::Serialization(err.to_string())
        }
    }
}
