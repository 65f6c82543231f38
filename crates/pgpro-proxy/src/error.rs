//! Error types for the proxy crate.

use std::io::ErrorKind;

use pgpro_backend::BackendError;
use pgpro_cache::CacheError;
use pgpro_policy::PolicyError;
use pgpro_protocol::ProtocolError;
use thiserror::Error;

/// Errors that end a client session or stop the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind to the listen address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    /// Client broke the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A message that is not valid in the current session state.
    #[error("unexpected {got} while waiting for {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    /// StartupMessage without a `user` parameter.
    #[error("no user name in startup packet")]
    MissingUser,

    /// Upstream failure other than a statement error.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The client went away mid-session. Not worth more than a debug line.
    pub fn is_disconnect(&self) -> bool {
        let io = match self {
            ProxyError::Io(e) | ProxyError::Protocol(ProtocolError::Io(e)) => e,
            _ => return false,
        };
        matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        let reset = ProxyError::Io(std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(reset.is_disconnect());

        let wrapped = ProxyError::Protocol(ProtocolError::Io(std::io::Error::from(
            ErrorKind::BrokenPipe,
        )));
        assert!(wrapped.is_disconnect());

        assert!(!ProxyError::MissingUser.is_disconnect());
        assert!(!ProxyError::Backend(BackendError::Closed).is_disconnect());
    }
}
