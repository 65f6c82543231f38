use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to (de)serialize cached result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend is not configured: {0}")]
    NotConfigured(String),

    #[error("cache backend failed: {0}")]
    Backend(String),
}
