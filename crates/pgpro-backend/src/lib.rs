//! # pgpro-backend
//!
//! Everything the proxy does with upstream PostgreSQL servers.
//!
//! - [`UpstreamConnection`]: startup, authentication (trust, cleartext, MD5,
//!   SCRAM-SHA-256) and simple-query execution over the wire protocol
//! - [`ConnectionPool`]: a bounded pool per configured data source
//! - [`BackendRouter`]: reads to a random replica, everything else to the
//!   primary
//! - [`PassthroughPool`] and [`splice`]: raw forwarding to the primary

pub mod connection;
pub mod error;
pub mod executor;
pub mod passthrough;
pub mod pool;
pub mod router;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use pgpro_core::PgProConfig;

pub use connection::{RelayOutcome, UpstreamConnection};
pub use error::BackendError;
pub use executor::{Execution, Executor, SessionConnection};
pub use passthrough::{PassthroughPool, RawRelay, splice, splice_streams};
pub use pool::{ConnectionPool, PooledConnection};
pub use router::BackendRouter;

/// One pool per configured data source, in configuration order.
pub fn build_pools(config: &PgProConfig) -> Result<Vec<ConnectionPool>, BackendError> {
    config
        .sources
        .iter()
        .map(|source| {
            let target = source
                .target()
                .map_err(|e| BackendError::Config(e.to_string()))?;
            Ok(ConnectionPool::new(
                source.role,
                target,
                source.min_conns,
                source.max_conns,
                config.pool.clone(),
            ))
        })
        .collect()
}

/// Router over freshly built pools, warmed up before it is returned.
pub async fn build_router(config: &PgProConfig) -> Result<BackendRouter, BackendError> {
    let pools = build_pools(config)?;
    for pool in &pools {
        pool.warm_up().await;
    }
    BackendRouter::new(
        pools
            .into_iter()
            .map(|pool| Arc::new(pool) as Arc<dyn Executor>)
            .collect(),
    )
}

/// Passthrough pool pointed at the primary source.
pub fn build_passthrough(config: &PgProConfig) -> Result<PassthroughPool, BackendError> {
    let primary = config.primary().ok_or(BackendError::NoPrimary)?;
    let target = primary
        .target()
        .map_err(|e| BackendError::Config(e.to_string()))?;
    Ok(PassthroughPool::new(
        target,
        &config.passthrough,
        config.pool.connect_timeout(),
    ))
}
