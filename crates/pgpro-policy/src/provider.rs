use async_trait::async_trait;
use pgpro_core::TableAccessInfo;

use crate::error::PolicyError;

/// Source of credentials and table permissions.
///
/// One implementation is selected at startup by [`crate::build_provider`].
/// Implementations must be safe to share across sessions.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// Verify an MD5 password response.
    ///
    /// `supplied` is the value the client sent, `"md5" + hex(md5(hex(md5(password + user)) + salt))`,
    /// and `salt` the challenge issued for this session.
    async fn check_auth(&self, user: &str, supplied: &str, salt: &[u8; 4])
        -> Result<bool, PolicyError>;

    /// Whether `user` may perform `access`.
    async fn check_access(&self, access: &TableAccessInfo, user: &str) -> Result<bool, PolicyError>;

    /// Superusers bypass table checks entirely.
    async fn is_superuser(&self, user: &str) -> Result<bool, PolicyError>;
}
