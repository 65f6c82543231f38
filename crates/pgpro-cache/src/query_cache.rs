//! Query result cache.
//!
//! Results are stored under the literal SQL text they answered. Reads
//! fail open: a backend error is reported and treated as a miss. Writes run
//! detached from the client response, and their failures are reported on
//! the [`CacheEvents`] channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pgpro_core::QueryResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Hit and miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stored: AtomicU64,
    pub failures: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// A cache operation that failed without affecting the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    GetFailed { key: String, error: String },
    SetFailed { key: String, error: String },
}

/// Receiving end of the cache failure channel.
pub struct CacheEvents {
    rx: mpsc::UnboundedReceiver<CacheEvent>,
}

impl CacheEvents {
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        self.rx.recv().await
    }

    /// Log every event until all cache handles are dropped.
    pub fn spawn_logger(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.rx.recv().await {
                match event {
                    CacheEvent::GetFailed { key, error } => {
                        warn!(event = "cache_get", key = %key, error = %error, "Cache read failed, executing live");
                    }
                    CacheEvent::SetFailed { key, error } => {
                        warn!(event = "cache_set", key = %key, error = %error, "Cache write failed");
                    }
                }
            }
        })
    }
}

/// Cache of read query results keyed by exact SQL text.
#[derive(Clone)]
pub struct QueryCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    events: mpsc::UnboundedSender<CacheEvent>,
    stats: Arc<CacheStats>,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> (Self, CacheEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Self {
            backend: Some(backend),
            ttl,
            events: tx,
            stats: Arc::new(CacheStats::default()),
        };
        (cache, CacheEvents { rx })
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            backend: None,
            ttl: Duration::ZERO,
            events: tx,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub async fn get(&self, key: &str) -> Result<Option<QueryResult>, CacheError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        match backend.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, result: &QueryResult) -> Result<(), CacheError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(result)?;
        backend.set(key, bytes, self.ttl).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        match &self.backend {
            Some(backend) => backend.clear().await,
            None => Ok(()),
        }
    }

    /// Read-through lookup. Errors are reported and count as a miss.
    pub async fn lookup(&self, key: &str) -> Option<QueryResult> {
        if !self.is_enabled() {
            return None;
        }
        match self.get(key).await {
            Ok(Some(result)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(rows = result.rows.len(), "Cache hit");
                Some(result)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(CacheEvent::GetFailed {
                    key: key.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Store a result without waiting for the backend.
    ///
    /// Returns `None` when caching is disabled.
    pub fn store_detached(&self, key: String, result: QueryResult) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let cache = self.clone();
        Some(tokio::spawn(async move {
            match cache.set(&key, &result).await {
                Ok(()) => {
                    cache.stats.stored.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    cache.stats.failures.fetch_add(1, Ordering::Relaxed);
                    let _ = cache.events.send(CacheEvent::SetFailed {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }))
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("ttl", &self.ttl)
            .finish()
    }
}
