//! Read/write routing across the primary and its replicas.

use std::sync::Arc;

use pgpro_core::QueryResult;
use pgpro_core::config::SourceRole;
use rand::Rng;
use tracing::debug;

use crate::error::BackendError;
use crate::executor::{Executor, SessionConnection};

/// Routes reads to a random replica and everything else to the primary.
#[derive(Clone)]
pub struct BackendRouter {
    primary: Arc<dyn Executor>,
    replicas: Vec<Arc<dyn Executor>>,
}

impl BackendRouter {
    /// Exactly one executor must have the primary role.
    pub fn new(executors: Vec<Arc<dyn Executor>>) -> Result<Self, BackendError> {
        let (primaries, replicas): (Vec<_>, Vec<_>) = executors
            .into_iter()
            .partition(|e| e.role() == SourceRole::Primary);

        let mut primaries = primaries.into_iter();
        let primary = match (primaries.next(), primaries.len()) {
            (None, _) => return Err(BackendError::NoPrimary),
            (Some(primary), 0) => primary,
            (Some(_), rest) => return Err(BackendError::MultiplePrimaries(rest + 1)),
        };

        Ok(Self { primary, replicas })
    }

    pub fn primary(&self) -> &Arc<dyn Executor> {
        &self.primary
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Pick the executor for a batch. Replicas are chosen uniformly at
    /// random on every call.
    pub fn route(&self, is_read: bool) -> &Arc<dyn Executor> {
        if is_read && !self.replicas.is_empty() {
            let idx = rand::rng().random_range(0..self.replicas.len());
            &self.replicas[idx]
        } else {
            &self.primary
        }
    }

    /// Check out a connection from the executor picked by [`Self::route`].
    pub async fn checkout(
        &self,
        is_read: bool,
    ) -> Result<Box<dyn SessionConnection>, BackendError> {
        let target = self.route(is_read);
        debug!(source = %target.name(), role = ?target.role(), is_read, "Routing query");
        target.checkout().await
    }

    pub async fn execute(&self, sql: &str, is_read: bool) -> Result<QueryResult, BackendError> {
        let target = self.route(is_read);
        debug!(source = %target.name(), role = ?target.role(), is_read, "Routing query");
        target.execute(sql).await
    }
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("primary", &self.primary.name())
            .field(
                "replicas",
                &self.replicas.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Execution;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: String,
        role: SourceRole,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(name: &str, role: SourceRole) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                role,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn exec(e: &Arc<Counting>) -> Arc<dyn Executor> {
        e.clone()
    }

    #[async_trait]
    impl Executor for Counting {
        fn name(&self) -> &str {
            &self.name
        }

        fn role(&self) -> SourceRole {
            self.role
        }

        async fn checkout(&self) -> Result<Box<dyn SessionConnection>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Tagged(self.name.clone())))
        }
    }

    /// Answers every batch with its own name as the command tag.
    struct Tagged(String);

    #[async_trait]
    impl SessionConnection for Tagged {
        async fn run(&mut self, _sql: &str) -> Result<Execution, BackendError> {
            Ok(Execution::ok(QueryResult::command(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn test_reads_never_hit_primary_when_replicas_exist() {
        let primary = Counting::new("primary", SourceRole::Primary);
        let r1 = Counting::new("r1", SourceRole::Replica);
        let r2 = Counting::new("r2", SourceRole::Replica);
        let router = BackendRouter::new(vec![exec(&primary), exec(&r1), exec(&r2)]).unwrap();

        for _ in 0..200 {
            router.execute("SELECT 1", true).await.unwrap();
        }
        assert_eq!(primary.calls(), 0);
        assert_eq!(r1.calls() + r2.calls(), 200);
        assert!(r1.calls() > 0 && r2.calls() > 0);
    }

    #[tokio::test]
    async fn test_writes_always_hit_primary() {
        let primary = Counting::new("primary", SourceRole::Primary);
        let replica = Counting::new("replica", SourceRole::Replica);
        let router = BackendRouter::new(vec![exec(&replica), exec(&primary)]).unwrap();

        for _ in 0..20 {
            let result = router.execute("DELETE FROM t", false).await.unwrap();
            assert_eq!(result.command_tag, "primary");
        }
        assert_eq!(replica.calls(), 0);
    }

    #[tokio::test]
    async fn test_reads_fall_back_to_primary() {
        let primary = Counting::new("primary", SourceRole::Primary);
        let router = BackendRouter::new(vec![exec(&primary)]).unwrap();
        router.execute("SELECT 1", true).await.unwrap();
        assert_eq!(primary.calls(), 1);
        assert_eq!(router.replica_count(), 0);
    }

    #[tokio::test]
    async fn test_checkout_follows_routing() {
        let primary = Counting::new("primary", SourceRole::Primary);
        let replica = Counting::new("replica", SourceRole::Replica);
        let router = BackendRouter::new(vec![exec(&primary), exec(&replica)]).unwrap();

        let mut conn = router.checkout(false).await.unwrap();
        let execution = conn.run("BEGIN").await.unwrap();
        assert_eq!(execution.result.command_tag, "primary");
        router.checkout(true).await.unwrap();
        assert_eq!((primary.calls(), replica.calls()), (1, 1));
    }

    #[test]
    fn test_two_primaries_rejected() {
        let err = BackendRouter::new(vec![
            exec(&Counting::new("a", SourceRole::Primary)),
            exec(&Counting::new("b", SourceRole::Primary)),
            exec(&Counting::new("c", SourceRole::Replica)),
        ])
        .unwrap_err();
        assert!(matches!(err, BackendError::MultiplePrimaries(2)));
    }

    #[test]
    fn test_no_primary_rejected() {
        let err = BackendRouter::new(vec![exec(&Counting::new("r", SourceRole::Replica))]).unwrap_err();
        assert!(matches!(err, BackendError::NoPrimary));
    }
}
