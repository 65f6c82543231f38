use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Byte-oriented key/value store behind the query cache.
///
/// Keys are used exactly as given; backends must not normalize them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove every entry owned by this backend.
    async fn clear(&self) -> Result<(), CacheError>;
}
