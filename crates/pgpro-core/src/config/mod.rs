//! Configuration types for the pg_pro proxy.
//!
//! A single file (`config.yaml`, or `.toml`) describes the listener, the
//! upstream data sources, the read cache and the authorization provider.
//! When no path is given the file is looked up in [`SEARCH_DIRS`].

pub mod auth;
pub mod cache;
pub mod pool;
pub mod source;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use auth::{AuthConfig, AuthProviderKind};
pub use cache::{CacheBackendKind, CacheConfig, CacheConnectionInfo};
pub use pool::{PassthroughSettings, PoolSettings};
pub use source::{ConnectionTarget, DataSourceConfig, SourceRole};

/// File name looked up when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Directories searched for [`CONFIG_FILE_NAME`], in order. `~` is the
/// user's home directory.
pub const SEARCH_DIRS: &[&str] = &["/etc/pg_pro", "~/.pg_pro", "."];

/// How client connections are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Speak the wire protocol: authenticate, classify, route and cache.
    #[default]
    Session,
    /// Copy bytes between the client and the primary, nothing else.
    Splice,
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgProConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port to listen on for client connections.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Version string announced to clients in ParameterStatus.
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Session (protocol aware) or splice (pure TCP proxy).
    #[serde(default)]
    pub mode: ProxyMode,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Upstream servers. Exactly one must be the primary.
    #[serde(default)]
    pub sources: Vec<DataSourceConfig>,

    /// Execution pool timeouts.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Raw passthrough connection settings.
    #[serde(default)]
    pub passthrough: PassthroughSettings,

    /// Read-result cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Authentication and authorization.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for PgProConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            server_version: default_server_version(),
            mode: ProxyMode::default(),
            max_connections: default_max_connections(),
            sources: Vec::new(),
            pool: PoolSettings::default(),
            passthrough: PassthroughSettings::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    5432
}

fn default_server_version() -> String {
    "14.0".to_string()
}

fn default_max_connections() -> usize {
    1000
}

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("no {file} found in any of: {searched}")]
    NotFound { file: String, searched: String },

    #[error("no primary data source configured")]
    NoPrimary,

    #[error("exactly one primary data source is allowed, found {count}")]
    MultiplePrimaries { count: usize },

    #[error("invalid data source url: {reason}")]
    InvalidSourceUrl { reason: String },

    #[error("invalid pool size for source #{index}: min_conns={min}, max_conns={max}")]
    InvalidPoolSize { index: usize, min: u32, max: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PgProConfig {
    /// Load configuration from a YAML file, or TOML when the extension is `.toml`.
    ///
    /// Relative paths inside the file are resolved against its directory.
    /// The result is not validated; call [`PgProConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml(&content)?
        } else {
            Self::from_yaml(&content)?
        };

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base_dir);
        Ok(config)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    /// Load from `path` if given, otherwise from the first [`CONFIG_FILE_NAME`]
    /// found in [`SEARCH_DIRS`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_file(Self::discover()?),
        }
    }

    /// Locate the config file in the search directories.
    pub fn discover() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let candidates: Vec<PathBuf> = SEARCH_DIRS
            .iter()
            .filter_map(|dir| match dir.strip_prefix("~/") {
                Some(rest) => home.as_ref().map(|h| h.join(rest)),
                None => Some(PathBuf::from(dir)),
            })
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .collect();

        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| ConfigError::NotFound {
                file: CONFIG_FILE_NAME.to_string(),
                searched: candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(path) = &self.auth.path
            && path.is_relative()
        {
            self.auth.path = Some(base_dir.join(path));
        }
    }

    /// Check the invariants that must hold before any connection is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let primaries = self
            .sources
            .iter()
            .filter(|s| s.role == SourceRole::Primary)
            .count();
        match primaries {
            0 => return Err(ConfigError::NoPrimary),
            1 => {}
            count => return Err(ConfigError::MultiplePrimaries { count }),
        }

        for (index, source) in self.sources.iter().enumerate() {
            source.target()?;
            if source.max_conns == 0 || source.min_conns > source.max_conns {
                return Err(ConfigError::InvalidPoolSize {
                    index,
                    min: source.min_conns,
                    max: source.max_conns,
                });
            }
        }

        if self.cache.backend == CacheBackendKind::Redis && self.cache.connection_info.url.is_none() {
            return Err(ConfigError::Config(
                "cache backend 'redis' requires cache.connection_info.url".to_string(),
            ));
        }

        if self.auth.provider == AuthProviderKind::Yaml && self.auth.path.is_none() {
            return Err(ConfigError::Config(
                "auth provider 'yaml' requires auth.path".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The single primary source. Only meaningful after [`PgProConfig::validate`].
    pub fn primary(&self) -> Option<&DataSourceConfig> {
        self.sources.iter().find(|s| s.role == SourceRole::Primary)
    }

    /// `listen_addr:listen_port`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}
