//! `pgpro cache clear`.

use anyhow::{Context, Result};
use std::path::Path;

use super::load_config;

pub async fn clear(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let Some(backend) = pgpro_cache::build_backend(&config.cache)
        .await
        .context("Failed to open cache backend")?
    else {
        println!("Cache is disabled, nothing to clear.");
        return Ok(());
    };

    backend
        .clear()
        .await
        .with_context(|| format!("Failed to clear {} cache", backend.name()))?;
    println!("✔ Cleared {} cache", backend.name());
    Ok(())
}
