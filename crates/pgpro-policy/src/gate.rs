use std::sync::Arc;

use pgpro_core::TableAccessInfo;
use tracing::{debug, warn};

use crate::error::AccessDenied;
use crate::provider::AuthorizationProvider;

/// Per-statement authorization in front of execution.
///
/// Accesses are checked in order and the first denial aborts the batch.
/// Provider failures count as denials.
#[derive(Clone)]
pub struct AccessGate {
    provider: Arc<dyn AuthorizationProvider>,
}

impl AccessGate {
    pub fn new(provider: Arc<dyn AuthorizationProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn AuthorizationProvider> {
        &self.provider
    }

    /// Authorize a single access.
    pub async fn authorize(&self, access: &TableAccessInfo, user: &str) -> bool {
        match self.provider.check_access(access, user).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(user = %user, table = %access.qualified_name(), error = %e, "Access check failed");
                false
            }
        }
    }

    /// Authorize every access of a statement batch.
    pub async fn authorize_batch(
        &self,
        accesses: &[TableAccessInfo],
        user: &str,
    ) -> Result<(), AccessDenied> {
        match self.provider.is_superuser(user).await {
            Ok(true) => {
                debug!(user = %user, "Superuser, skipping table checks");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(user = %user, error = %e, "Superuser lookup failed"),
        }

        for access in accesses {
            if !self.authorize(access, user).await {
                warn!(
                    user = %user,
                    table = %access.qualified_name(),
                    mode = %access.access_mode,
                    "Access denied"
                );
                return Err(AccessDenied::new(user, access.clone()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate").finish_non_exhaustive()
    }
}
