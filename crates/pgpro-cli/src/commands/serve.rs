//! `pgpro serve` and `pgpro splice`.

use anyhow::{Context, Result};
use pgpro_core::config::ProxyMode;
use pgpro_proxy::{AppContext, PgProProxy, SpliceProxy};
use std::path::Path;
use std::sync::Arc;

use super::load_config;

/// Run the proxy until Ctrl-C. `force_splice` overrides the configured mode.
pub async fn serve(config_path: Option<&Path>, force_splice: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let mode = if force_splice {
        ProxyMode::Splice
    } else {
        config.mode
    };

    tracing::info!(
        listen = %config.listen_address(),
        mode = ?mode,
        sources = config.sources.len(),
        "Starting pg_pro"
    );

    match mode {
        ProxyMode::Session => {
            let (ctx, events) = AppContext::from_config(&config)
                .await
                .context("Failed to initialize proxy")?;
            if let Some(events) = events {
                events.spawn_logger();
            }
            PgProProxy::new(config, Arc::new(ctx)).run().await?;
        }
        ProxyMode::Splice => {
            let target = config
                .primary()
                .context("no primary data source configured")?
                .target()?;
            SpliceProxy::new(config, target).run().await?;
        }
    }

    tracing::info!("pg_pro stopped");
    Ok(())
}
