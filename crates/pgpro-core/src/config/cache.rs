//! Read-result cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which cache backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Caching disabled.
    #[default]
    None,
    /// In-process map.
    Memory,
    /// Shared Redis server.
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend name.
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Time to live of cached results, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// Backend specific connection parameters.
    #[serde(default)]
    pub connection_info: CacheConnectionInfo,
}

impl CacheConfig {
    pub fn enabled(&self) -> bool {
        self.backend != CacheBackendKind::None
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::None,
            ttl: default_ttl(),
            connection_info: CacheConnectionInfo::default(),
        }
    }
}

/// Backend specific cache parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConnectionInfo {
    /// Redis URL (`redis://host:port/db`).
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix prepended to every key in shared stores.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Entry limit of the in-memory backend.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConnectionInfo {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "pgpro:".to_string()
}

fn default_max_entries() -> usize {
    10_000
}
