use async_trait::async_trait;
use pgpro_core::config::SourceRole;
use pgpro_core::{DbError, QueryResult};
use pgpro_protocol::TransactionStatus;

use crate::error::BackendError;

/// Everything one statement batch produced on its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Rows of the last row-returning statement and the last command tag,
    /// kept even when a later statement failed.
    pub result: QueryResult,
    /// First ErrorResponse of the batch.
    pub error: Option<DbError>,
    /// Status from the closing ReadyForQuery.
    pub status: TransactionStatus,
}

impl Execution {
    pub fn ok(result: QueryResult) -> Self {
        Self {
            result,
            error: None,
            status: TransactionStatus::Idle,
        }
    }

    pub fn failed(error: DbError) -> Self {
        Self {
            result: QueryResult::default(),
            error: Some(error),
            status: TransactionStatus::Idle,
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// The batch left a transaction open, failed or not.
    pub fn in_transaction(&self) -> bool {
        self.status != TransactionStatus::Idle
    }

    pub fn into_result(self) -> Result<QueryResult, BackendError> {
        match self.error {
            Some(err) => Err(BackendError::Database(err)),
            None => Ok(self.result),
        }
    }
}

/// A checked-out upstream connection. Dropping it hands it back.
#[async_trait]
pub trait SessionConnection: Send {
    async fn run(&mut self, sql: &str) -> Result<Execution, BackendError>;
}

/// Something that hands out upstream connections: a
/// [`crate::ConnectionPool`] in production.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Display name for logs (credentials redacted).
    fn name(&self) -> &str;

    fn role(&self) -> SourceRole;

    async fn checkout(&self) -> Result<Box<dyn SessionConnection>, BackendError>;

    /// Run one batch on a connection that goes straight back afterwards.
    async fn execute(&self, sql: &str) -> Result<QueryResult, BackendError> {
        let mut conn = self.checkout().await?;
        conn.run(sql).await?.into_result()
    }
}
