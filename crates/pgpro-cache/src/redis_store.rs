//! Shared Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Keys requested per SCAN round trip.
const SCAN_COUNT: usize = 500;

/// Redis store; every key is namespaced with a prefix so `clear` only
/// touches entries written by the proxy.
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisBackend {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(url = %url, "Connected to Redis cache");
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(&self.key_prefix));
        let mut cursor: u64 = 0;
        let mut removed: usize = 0;
        loop {
            let (next, keys) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async::<(u64, Vec<Vec<u8>>)>(&mut conn)
                .await?;
            if !keys.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<usize>(&mut conn)
                    .await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        info!(removed, "Cleared Redis cache");
        Ok(())
    }
}

/// Escape glob metacharacters so a prefix matches only itself in
/// `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
