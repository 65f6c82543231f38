use std::time::Duration;

use pgpro_core::DbError;
use pgpro_protocol::ProtocolError;
use thiserror::Error;

/// Failures talking to upstream servers.
///
/// Only [`BackendError::Database`] is a per-statement failure; every other
/// variant means the connection, or the pool behind it, cannot be used.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Database(DbError),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("upstream authentication failed: {0}")]
    Auth(String),

    #[error("upstream protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream closed the connection")]
    Closed,

    #[error("timed out waiting for a connection to {pool} after {timeout:?}")]
    AcquireTimeout { pool: String, timeout: Duration },

    #[error("connection pool {0} is closed")]
    PoolClosed(String),

    #[error("no primary data source configured")]
    NoPrimary,

    #[error("exactly one primary data source is allowed, found {0}")]
    MultiplePrimaries(usize),

    #[error("invalid data source: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether this is a structured error reported by the database for the
    /// statement itself.
    pub fn is_database(&self) -> bool {
        matches!(self, BackendError::Database(_))
    }

    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            BackendError::Database(err) => Some(err),
            _ => None,
        }
    }
}
