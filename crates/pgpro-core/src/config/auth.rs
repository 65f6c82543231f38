//! Authorization provider configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Which authorization provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProviderKind {
    /// Static users file.
    #[default]
    Yaml,
}

/// Authentication and authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Provider name.
    #[serde(default)]
    pub provider: AuthProviderKind,

    /// Users file for the `yaml` provider. Relative paths are resolved
    /// against the directory of the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Close the client connection after a failed password check.
    ///
    /// When false, the session reports the failure and keeps reading
    /// messages; every query is still checked by the access gate.
    #[serde(default = "default_close_on_failure")]
    pub close_on_failure: bool,

    /// Extra ParameterStatus values announced after a successful login.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: AuthProviderKind::default(),
            path: None,
            close_on_failure: default_close_on_failure(),
            parameters: BTreeMap::new(),
        }
    }
}

fn default_close_on_failure() -> bool {
    true
}
