//! # pgpro-cache
//!
//! Cache of read query results, keyed by the exact SQL text.
//!
//! The [`QueryCache`] serializes [`pgpro_core::QueryResult`] values and
//! stores them in any [`CacheBackend`]: an in-process [`MemoryBackend`] or
//! a shared [`RedisBackend`].

pub mod backend;
pub mod error;
pub mod memory;
pub mod query_cache;
pub mod redis_store;

use std::sync::Arc;

use pgpro_core::config::{CacheBackendKind, CacheConfig};

pub use backend::CacheBackend;
pub use error::CacheError;
pub use memory::MemoryBackend;
pub use query_cache::{CacheEvent, CacheEvents, CacheStats, QueryCache};
pub use redis_store::RedisBackend;

/// Build the backend named in the configuration, `None` when caching is off.
pub async fn build_backend(
    config: &CacheConfig,
) -> Result<Option<Arc<dyn CacheBackend>>, CacheError> {
    let info = &config.connection_info;
    match config.backend {
        CacheBackendKind::None => Ok(None),
        CacheBackendKind::Memory => Ok(Some(Arc::new(MemoryBackend::new(info.max_entries)))),
        CacheBackendKind::Redis => {
            let url = info
                .url
                .as_deref()
                .ok_or_else(|| CacheError::NotConfigured("redis backend needs a url".into()))?;
            let backend = RedisBackend::connect(url, info.key_prefix.clone()).await?;
            Ok(Some(Arc::new(backend)))
        }
    }
}

/// Build the query cache for the configuration, along with its failure channel.
pub async fn build_cache(
    config: &CacheConfig,
) -> Result<(QueryCache, Option<CacheEvents>), CacheError> {
    Ok(match build_backend(config).await? {
        Some(backend) => {
            let (cache, events) = QueryCache::new(backend, config.ttl());
            (cache, Some(events))
        }
        None => (QueryCache::disabled(), None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_none() {
        let (cache, events) = build_cache(&CacheConfig::default()).await.unwrap();
        assert!(!cache.is_enabled());
        assert!(events.is_none());
    }

    #[tokio::test]
    async fn test_build_memory() {
        let config = CacheConfig {
            backend: CacheBackendKind::Memory,
            ..CacheConfig::default()
        };
        let (cache, events) = build_cache(&config).await.unwrap();
        assert!(cache.is_enabled());
        assert!(events.is_some());
        assert_eq!(cache.ttl(), std::time::Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_redis_requires_url() {
        let config = CacheConfig {
            backend: CacheBackendKind::Redis,
            ..CacheConfig::default()
        };
        assert!(matches!(
            build_backend(&config).await,
            Err(CacheError::NotConfigured(_))
        ));
    }
}
