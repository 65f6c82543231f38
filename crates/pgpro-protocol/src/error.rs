//! Error types for the protocol crate.

use thiserror::Error;

/// Errors raised while framing or parsing wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A length prefix outside the accepted range.
    #[error("invalid length {len} for message '{tag}'")]
    InvalidLength { tag: char, len: i64 },

    /// A message whose body does not match its type.
    #[error("malformed '{tag}' message: {reason}")]
    Malformed { tag: char, reason: String },

    /// A startup packet with an unknown or unsupported code.
    #[error("unsupported startup request code {0}")]
    UnsupportedStartup(i32),

    /// A message that is valid but not allowed at this point of the exchange.
    #[error("unexpected message '{got}', expected {expected}")]
    UnexpectedMessage { expected: &'static str, got: char },

    /// Upstream authentication could not be completed.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ProtocolError {
    pub(crate) fn malformed(tag: u8, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            tag: tag as char,
            reason: reason.into(),
        }
    }
}
