//! Process-wide state shared by every session.

use std::collections::BTreeMap;
use std::sync::Arc;

use pgpro_backend::{BackendRouter, RawRelay, build_passthrough, build_router};
use pgpro_cache::{CacheEvents, QueryCache, build_cache};
use pgpro_core::PgProConfig;
use pgpro_policy::{AccessGate, build_provider};
use pgpro_sql::QueryClassifier;
use tracing::info;

use crate::error::ProxyError;

/// Per-session behavior taken from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Announced as `server_version` after login.
    pub server_version: String,
    /// Close the connection after a failed password check.
    pub close_on_failure: bool,
    /// Extra ParameterStatus values announced after `is_superuser`.
    pub parameters: BTreeMap<String, String>,
}

impl SessionSettings {
    pub fn from_config(config: &PgProConfig) -> Self {
        Self {
            server_version: config.server_version.clone(),
            close_on_failure: config.auth.close_on_failure,
            parameters: config.auth.parameters.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&PgProConfig::default())
    }
}

/// Everything a session needs, assembled once at startup.
pub struct AppContext {
    pub settings: SessionSettings,
    pub classifier: QueryClassifier,
    pub gate: AccessGate,
    pub cache: QueryCache,
    pub router: BackendRouter,
    pub passthrough: Arc<dyn RawRelay>,
}

impl AppContext {
    pub fn new(
        settings: SessionSettings,
        gate: AccessGate,
        cache: QueryCache,
        router: BackendRouter,
        passthrough: Arc<dyn RawRelay>,
    ) -> Self {
        Self {
            settings,
            classifier: QueryClassifier::new(),
            gate,
            cache,
            router,
            passthrough,
        }
    }

    /// Build providers, cache and pools from a validated configuration.
    ///
    /// The returned [`CacheEvents`] must be drained (usually with
    /// [`CacheEvents::spawn_logger`]) for cache failures to be reported.
    pub async fn from_config(config: &PgProConfig) -> Result<(Self, Option<CacheEvents>), ProxyError> {
        let provider = build_provider(&config.auth)?;
        let (cache, events) = build_cache(&config.cache).await?;
        let router = build_router(config).await?;
        let passthrough = build_passthrough(config)?;

        info!(
            replicas = router.replica_count(),
            cache = cache.is_enabled(),
            "Application context ready"
        );

        let ctx = Self::new(
            SessionSettings::from_config(config),
            AccessGate::new(provider),
            cache,
            router,
            Arc::new(passthrough),
        );
        Ok((ctx, events))
    }
}
