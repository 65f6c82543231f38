//! In-process backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::backend::CacheBackend;
use crate::error::CacheError;

struct Entry {
    data: Bytes,
    expires_at: Instant,
}

/// `DashMap` backed store with per-entry expiry and an entry limit.
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
    max_entries: usize,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then arbitrary ones until under the limit.
    fn evict(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);

        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess > 0 {
            let victims: Vec<String> = self
                .entries
                .iter()
                .take(excess)
                .map(|e| e.key().clone())
                .collect();
            for key in victims {
                self.entries.remove(&key);
            }
            debug!(evicted = excess, "Memory cache over capacity");
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expires_at > Instant::now() {
            return Ok(Some(entry.data.to_vec()));
        }
        drop(entry);
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                data: Bytes::from(value),
                expires_at: Instant::now() + ttl,
            },
        );
        if self.entries.len() > self.max_entries {
            self.evict();
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
