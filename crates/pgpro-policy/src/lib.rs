//! # pgpro-policy
//!
//! Authentication and authorization for proxied sessions.
//!
//! An [`AuthorizationProvider`] answers three questions: does this MD5
//! response match the user's password, may the user perform this table
//! access, and is the user a superuser. The [`AccessGate`] applies the
//! provider to every access of a classified statement batch.

pub mod error;
pub mod gate;
pub mod provider;
pub mod yaml;

use std::sync::Arc;

use pgpro_core::config::auth::{AuthConfig, AuthProviderKind};
use tracing::info;

pub use error::{AccessDenied, PolicyError};
pub use gate::AccessGate;
pub use provider::AuthorizationProvider;
pub use yaml::YamlFileProvider;

/// Build the provider named in the configuration.
pub fn build_provider(config: &AuthConfig) -> Result<Arc<dyn AuthorizationProvider>, PolicyError> {
    match config.provider {
        AuthProviderKind::Yaml => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| PolicyError::NotConfigured("yaml provider needs `auth.path`".into()))?;
            let provider = YamlFileProvider::from_file(path)?;
            info!(path = %path.display(), users = provider.user_count(), "Loaded users file");
            Ok(Arc::new(provider))
        }
    }
}
