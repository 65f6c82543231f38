//! Execution pool of upstream connections for one data source.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgpro_core::QueryResult;
use pgpro_core::config::{ConnectionTarget, PoolSettings, SourceRole};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::connection::UpstreamConnection;
use crate::error::BackendError;
use crate::executor::{Execution, Executor, SessionConnection};

struct PoolInner {
    name: String,
    role: SourceRole,
    target: ConnectionTarget,
    settings: PoolSettings,
    min_conns: usize,
    max_conns: usize,
    idle: Mutex<VecDeque<UpstreamConnection>>,
    permits: Arc<Semaphore>,
}

/// Bounded pool of authenticated connections.
///
/// At most `max_conns` connections are checked out at once. Idle
/// connections are reused in FIFO order. A session keeps its connection
/// checked out while a transaction is open; broken ones, or ones still
/// inside a transaction when released, are dropped on return.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        role: SourceRole,
        target: ConnectionTarget,
        min_conns: u32,
        max_conns: u32,
        settings: PoolSettings,
    ) -> Self {
        let max_conns = max_conns.max(1) as usize;
        Self {
            inner: Arc::new(PoolInner {
                name: target.redacted(),
                role,
                target,
                settings,
                min_conns: (min_conns as usize).min(max_conns),
                max_conns,
                idle: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(max_conns)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> SourceRole {
        self.inner.role
    }

    pub fn max_conns(&self) -> usize {
        self.inner.max_conns
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Open `min_conns` connections up front. Failures are logged; the pool
    /// dials on demand later.
    pub async fn warm_up(&self) {
        let mut opened = 0;
        for _ in 0..self.inner.min_conns {
            match UpstreamConnection::connect(&self.inner.target, self.inner.settings.connect_timeout()).await {
                Ok(conn) => {
                    self.inner.idle.lock().push_back(conn);
                    opened += 1;
                }
                Err(e) => {
                    warn!(pool = %self.inner.name, error = %e, "Pool warm-up connection failed");
                    break;
                }
            }
        }
        info!(pool = %self.inner.name, role = ?self.inner.role, opened, "Pool ready");
    }

    /// Check out a connection, waiting at most the acquire timeout for a
    /// free slot.
    pub async fn acquire(&self) -> Result<PooledConnection, BackendError> {
        let timeout = self.inner.settings.acquire_timeout();
        let permit = tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| BackendError::AcquireTimeout {
                pool: self.inner.name.clone(),
                timeout,
            })?
            .map_err(|_| BackendError::PoolClosed(self.inner.name.clone()))?;

        let reused = self.inner.idle.lock().pop_front();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(pool = %self.inner.name, "Opening new upstream connection");
                UpstreamConnection::connect(&self.inner.target, self.inner.settings.connect_timeout())
                    .await?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Close the pool: pending and future acquires fail, idle connections
    /// are dropped.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("max_conns", &self.inner.max_conns)
            .finish()
    }
}

#[async_trait]
impl Executor for ConnectionPool {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn role(&self) -> SourceRole {
        self.inner.role
    }

    async fn checkout(&self) -> Result<Box<dyn SessionConnection>, BackendError> {
        Ok(Box::new(self.acquire().await?))
    }
}

/// A checked-out connection; returns to its pool on drop.
pub struct PooledConnection {
    conn: Option<UpstreamConnection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryResult, BackendError> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        conn.simple_query(sql).await
    }

    pub fn is_reusable(&self) -> bool {
        self.conn.as_ref().is_some_and(UpstreamConnection::is_reusable)
    }
}

#[async_trait]
impl SessionConnection for PooledConnection {
    async fn run(&mut self, sql: &str) -> Result<Execution, BackendError> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        conn.run(sql).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.pool.permits.is_closed() {
            return;
        }
        if conn.is_reusable() {
            self.pool.idle.lock().push_back(conn);
        } else {
            debug!(
                pool = %self.pool.name,
                usable = conn.is_usable(),
                status = ?conn.transaction_status(),
                "Discarding upstream connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use pgpro_protocol::TransactionStatus;
    use std::sync::atomic::Ordering;

    fn settings() -> PoolSettings {
        PoolSettings {
            acquire_timeout_ms: 100,
            connect_timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (target, accepted) = FakeServer::md5("app", "pw").spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 4, settings());

        for _ in 0..3 {
            let result = pool.execute("SELECT 1").await.unwrap();
            assert_eq!(result.command_tag, "SELECT 1");
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_conns() {
        let (target, accepted) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Replica, target, 2, 4, settings());
        pool.warm_up().await;
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (target, _) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 1, settings());

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, BackendError::AcquireTimeout { .. }));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_database_error_is_returned_typed() {
        let (target, _) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 1, settings());
        let err = pool.execute("SELECT * FROM missing").await.unwrap_err();
        assert!(err.is_database());
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_checkout_holds_connection_across_transaction() {
        let (target, accepted) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 2, settings());

        let mut conn = pool.checkout().await.unwrap();
        assert!(conn.run("BEGIN").await.unwrap().in_transaction());
        assert!(conn.run("INSERT INTO t VALUES (1)").await.unwrap().in_transaction());
        let done = conn.run("COMMIT").await.unwrap();
        assert_eq!(done.status, TransactionStatus::Idle);
        drop(conn);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_inside_transaction_discards_connection() {
        let (target, _) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 1, settings());

        let mut conn = pool.checkout().await.unwrap();
        conn.run("BEGIN").await.unwrap();
        drop(conn);

        assert_eq!(pool.idle_count(), 0);
        assert!(pool.execute("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_source() {
        let mut target = crate::testing::target(None);
        // Reserved port, nothing listens there.
        target.port = 1;
        let pool = ConnectionPool::new(
            SourceRole::Primary,
            target,
            0,
            1,
            PoolSettings {
                acquire_timeout_ms: 100,
                connect_timeout_ms: 200,
            },
        );
        let err = pool.execute("SELECT 1").await.unwrap_err();
        assert!(!err.is_database());
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let (target, _) = FakeServer::trust().spawn_tcp().await;
        let pool = ConnectionPool::new(SourceRole::Primary, target, 0, 1, settings());
        pool.close();
        assert!(matches!(
            pool.acquire().await.err().unwrap(),
            BackendError::PoolClosed(_)
        ));
    }
}
