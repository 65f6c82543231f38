//! Error types for authorization.

use std::path::PathBuf;

use pgpro_core::db_error::SQLSTATE_INSUFFICIENT_PRIVILEGE;
use pgpro_core::{AccessMode, DbError, TableAccessInfo};
use thiserror::Error;

/// Failures while loading or consulting an authorization provider.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read users file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid users file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("authorization provider is not configured: {0}")]
    NotConfigured(String),

    #[error("authorization provider failed: {0}")]
    Provider(String),
}

/// A table access rejected by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("permission denied for {target}")]
pub struct AccessDenied {
    pub user: String,
    pub access: TableAccessInfo,
    target: String,
}

impl AccessDenied {
    pub fn new(user: impl Into<String>, access: TableAccessInfo) -> Self {
        let target = if access.is_tableless() {
            match access.access_mode {
                AccessMode::Invalid => "invalid statement".to_string(),
                mode => format!("{} statement", mode.as_str().to_lowercase()),
            }
        } else {
            format!("table {}", access.name)
        };
        Self {
            user: user.into(),
            access,
            target,
        }
    }

    /// The ErrorResponse sent to the client (SQLSTATE 42501).
    pub fn to_db_error(&self) -> DbError {
        let err = DbError::error(SQLSTATE_INSUFFICIENT_PRIVILEGE, self.to_string());
        if self.access.is_tableless() {
            err
        } else {
            err.with_table(self.access.schema.clone(), self.access.name.clone())
        }
    }
}
