//! Static users file.
//!
//! ```yaml
//! alice:
//!   superuser: false
//!   password: secret        # or md5<hex(md5(password + user))>
//!   tables:
//!     - name: orders
//!       schema: public
//!       access_mode: [SELECT, INSERT]
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use pgpro_core::{AccessMode, DEFAULT_SCHEMA, TableAccessInfo};
use pgpro_protocol::auth::{md5_password_response, md5_salted, secure_eq};
use serde::Deserialize;
use tracing::debug;

use crate::error::PolicyError;
use crate::provider::AuthorizationProvider;

const WILDCARD: &str = "*";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// `access_mode` may be written as one mode or as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AccessModes {
    One(AccessMode),
    Many(Vec<AccessMode>),
}

impl AccessModes {
    fn contains(&self, mode: AccessMode) -> bool {
        match self {
            AccessModes::One(m) => *m == mode,
            AccessModes::Many(ms) => ms.contains(&mode),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TableGrant {
    name: String,
    #[serde(default = "default_schema")]
    schema: String,
    access_mode: AccessModes,
}

impl TableGrant {
    fn covers(&self, access: &TableAccessInfo) -> bool {
        let schema_ok = self.schema == WILDCARD || self.schema == access.schema;
        let table_ok = self.name == WILDCARD || self.name == access.name;
        schema_ok && table_ok && self.access_mode.contains(access.access_mode)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct UserEntry {
    #[serde(default)]
    superuser: bool,
    password: String,
    #[serde(default)]
    tables: Vec<TableGrant>,
}

impl UserEntry {
    fn expected_response(&self, user: &str, salt: &[u8; 4]) -> String {
        if is_md5_stored(&self.password) {
            md5_salted(&self.password, salt)
        } else {
            md5_password_response(user, &self.password, salt)
        }
    }

    fn allows(&self, access: &TableAccessInfo) -> bool {
        match access.access_mode {
            AccessMode::Invalid => false,
            AccessMode::System => self
                .tables
                .iter()
                .any(|t| t.access_mode.contains(AccessMode::System)),
            AccessMode::Select if access.is_tableless() => true,
            _ => self.tables.iter().any(|t| t.covers(access)),
        }
    }
}

fn is_md5_stored(password: &str) -> bool {
    password.len() == 35
        && password.starts_with("md5")
        && password[3..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Provider backed by a YAML users file, loaded once.
#[derive(Debug, Clone, Default)]
pub struct YamlFileProvider {
    users: HashMap<String, UserEntry>,
}

impl YamlFileProvider {
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let users = serde_yaml::from_str(&content).map_err(|source| PolicyError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { users })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        Ok(Self {
            users: serde_yaml::from_str(content)?,
        })
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Names of all configured users, sorted.
    pub fn users(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.users.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl AuthorizationProvider for YamlFileProvider {
    async fn check_auth(
        &self,
        user: &str,
        supplied: &str,
        salt: &[u8; 4],
    ) -> Result<bool, PolicyError> {
        let Some(entry) = self.users.get(user) else {
            debug!(user = %user, "Unknown user");
            return Ok(false);
        };
        Ok(secure_eq(&entry.expected_response(user, salt), supplied))
    }

    async fn check_access(&self, access: &TableAccessInfo, user: &str) -> Result<bool, PolicyError> {
        Ok(self.users.get(user).is_some_and(|entry| entry.allows(access)))
    }

    async fn is_superuser(&self, user: &str) -> Result<bool, PolicyError> {
        Ok(self.users.get(user).is_some_and(|entry| entry.superuser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgpro_protocol::auth::md5_stored_password;

    const USERS: &str = r#"
alice:
  password: secret
  tables:
    - name: orders
      schema: public
      access_mode: SELECT
    - name: "*"
      schema: reporting
      access_mode: [select, insert]
root:
  superuser: true
  password: md5a0a9f6b2a1b4b1c3f1f2d7a5c2e8e9f0
ops:
  password: ops
  tables:
    - name: "*"
      schema: "*"
      access_mode: [SYSTEM]
"#;

    fn provider() -> YamlFileProvider {
        YamlFileProvider::from_yaml(USERS).unwrap()
    }

    #[tokio::test]
    async fn test_check_auth_plaintext() {
        let p = provider();
        let salt = *b"1234";
        let good = md5_password_response("alice", "secret", &salt);
        assert!(p.check_auth("alice", &good, &salt).await.unwrap());
        assert!(!p.check_auth("alice", &good, b"4321").await.unwrap());
        assert!(!p.check_auth("mallory", &good, &salt).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_auth_stored_md5() {
        let stored = md5_stored_password("carol", "pw");
        let yaml = format!("carol:\n  password: {stored}\n");
        let p = YamlFileProvider::from_yaml(&yaml).unwrap();
        let salt = [9, 8, 7, 6];
        let response = md5_password_response("carol", "pw", &salt);
        assert!(p.check_auth("carol", &response, &salt).await.unwrap());
    }

    #[tokio::test]
    async fn test_table_grants() {
        let p = provider();
        let select = TableAccessInfo::new("public", "orders", AccessMode::Select);
        let delete = TableAccessInfo::new("public", "orders", AccessMode::Delete);
        let other = TableAccessInfo::new("public", "users", AccessMode::Select);
        assert!(p.check_access(&select, "alice").await.unwrap());
        assert!(!p.check_access(&delete, "alice").await.unwrap());
        assert!(!p.check_access(&other, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_wildcard_table() {
        let p = provider();
        let insert = TableAccessInfo::new("reporting", "daily", AccessMode::Insert);
        let update = TableAccessInfo::new("reporting", "daily", AccessMode::Update);
        assert!(p.check_access(&insert, "alice").await.unwrap());
        assert!(!p.check_access(&update, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_tableless_and_system() {
        let p = provider();
        let tableless = TableAccessInfo::tableless(AccessMode::Select);
        let system = TableAccessInfo::tableless(AccessMode::System);
        assert!(p.check_access(&tableless, "alice").await.unwrap());
        assert!(!p.check_access(&tableless, "mallory").await.unwrap());
        assert!(!p.check_access(&system, "alice").await.unwrap());
        assert!(p.check_access(&system, "ops").await.unwrap());
        assert!(
            !p.check_access(&TableAccessInfo::tableless(AccessMode::Invalid), "ops")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_superuser_flag() {
        let p = provider();
        assert!(p.is_superuser("root").await.unwrap());
        assert!(!p.is_superuser("alice").await.unwrap());
        assert!(!p.is_superuser("nobody").await.unwrap());
    }

    #[test]
    fn test_users_sorted() {
        assert_eq!(provider().users(), vec!["alice", "ops", "root"]);
    }

    #[test]
    fn test_unknown_access_mode_rejected() {
        let yaml = "dave:\n  password: x\n  tables:\n    - name: t\n      access_mode: TRUNCATE\n";
        assert!(YamlFileProvider::from_yaml(yaml).is_err());
    }
}
