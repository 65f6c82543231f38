//! Command implementations for the `pgpro` binary.

pub mod cache;
pub mod check;
pub mod hash;
pub mod serve;

use anyhow::{Context, Result};
use pgpro_core::PgProConfig;
use std::path::Path;

/// Load and validate the configuration, searching the default locations when
/// no path is given.
pub fn load_config(path: Option<&Path>) -> Result<PgProConfig> {
    let config = PgProConfig::load(path).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
