//! `pgpro check` command implementation.
//!
//! Loads the configuration and the users file it points to and reports
//! problems before the proxy is started:
//! - fatal validation errors (primaries, source URLs, pool sizes, ...)
//! - users file errors
//! - settings that are accepted but probably not intended

use anyhow::{Result, bail};
use pgpro_core::PgProConfig;
use pgpro_core::config::{AuthProviderKind, CacheBackendKind, ProxyMode, SourceRole};
use pgpro_policy::YamlFileProvider;
use std::fmt;
use std::path::Path;

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<Finding>,
}

impl CheckResults {
    fn push(&mut self, severity: Severity, category: &'static str, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            category,
            message: message.into(),
        });
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn print_summary(&self) {
        for severity in [Severity::Error, Severity::Warning, Severity::Info] {
            for finding in self.findings.iter().filter(|f| f.severity == severity) {
                println!("  {:<5} [{}] {}", severity, finding.category, finding.message);
            }
        }
        println!();
        if self.has_errors() {
            println!(
                "✘ {} error(s), {} warning(s)",
                self.count(Severity::Error),
                self.count(Severity::Warning)
            );
        } else {
            println!(
                "✔ Configuration is valid ({} warning(s))",
                self.count(Severity::Warning)
            );
        }
    }
}

/// Run every check and collect the findings without printing anything.
pub fn run_quiet(config_path: Option<&Path>) -> CheckResults {
    let mut results = CheckResults::default();

    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => match PgProConfig::discover() {
            Ok(path) => path,
            Err(e) => {
                results.push(Severity::Error, "config", e.to_string());
                return results;
            }
        },
    };
    let config = match PgProConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            results.push(Severity::Error, "config", e.to_string());
            return results;
        }
    };
    results.push(Severity::Info, "config", format!("loaded {}", path.display()));

    if let Err(e) = config.validate() {
        results.push(Severity::Error, "config", e.to_string());
    }

    check_sources(&config, &mut results);
    check_auth(&config, &mut results);
    check_cache(&config, &mut results);
    results
}

fn check_sources(config: &PgProConfig, results: &mut CheckResults) {
    // Unparseable URLs are already reported by validate().
    for source in &config.sources {
        if let Ok(target) = source.target() {
            results.push(
                Severity::Info,
                "sources",
                format!(
                    "{} {} (pool {}..{})",
                    source.role,
                    target.redacted(),
                    source.min_conns,
                    source.max_conns
                ),
            );
        }
    }

    let replicas = config
        .sources
        .iter()
        .filter(|s| s.role == SourceRole::Replica)
        .count();
    if config.mode == ProxyMode::Splice && replicas > 0 {
        results.push(
            Severity::Warning,
            "sources",
            format!("{replicas} replica(s) are unused in splice mode"),
        );
    }
}

fn check_auth(config: &PgProConfig, results: &mut CheckResults) {
    if config.mode == ProxyMode::Splice {
        return;
    }
    match config.auth.provider {
        AuthProviderKind::Yaml => {
            let Some(path) = &config.auth.path else {
                return;
            };
            match YamlFileProvider::from_file(path) {
                Ok(provider) if provider.user_count() == 0 => results.push(
                    Severity::Warning,
                    "auth",
                    format!("{} defines no users, every login will fail", path.display()),
                ),
                Ok(provider) => results.push(
                    Severity::Info,
                    "auth",
                    format!("users: {}", provider.users().join(", ")),
                ),
                Err(e) => results.push(Severity::Error, "auth", e.to_string()),
            }
        }
    }
    if !config.auth.close_on_failure {
        results.push(
            Severity::Warning,
            "auth",
            "close_on_failure is off, failed logins keep their connection",
        );
    }
}

fn check_cache(config: &PgProConfig, results: &mut CheckResults) {
    let cache = &config.cache;
    if !cache.enabled() {
        results.push(Severity::Info, "cache", "disabled");
        return;
    }
    if config.mode == ProxyMode::Splice {
        results.push(Severity::Warning, "cache", "the cache is unused in splice mode");
    }
    if cache.ttl == 0 {
        results.push(
            Severity::Warning,
            "cache",
            "ttl is 0, results expire as soon as they are stored",
        );
    }
    let backend = match cache.backend {
        CacheBackendKind::Memory => "memory",
        CacheBackendKind::Redis => "redis",
        CacheBackendKind::None => "none",
    };
    results.push(
        Severity::Info,
        "cache",
        format!("{backend} backend, ttl {}s", cache.ttl),
    );
}

pub fn run(config_path: Option<&Path>) -> Result<()> {
    println!("Checking pg_pro configuration...");
    println!();

    let results = run_quiet(config_path);
    results.print_summary();

    if results.has_errors() {
        bail!("configuration check failed");
    }
    Ok(())
}
