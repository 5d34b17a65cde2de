//! stashd - Cache maintenance daemon
//!
//! Builds the configured driver and keeps its storage tidy by purging
//! expired records until asked to stop.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stash::{spawn_purge_task, DriverRegistry, Pool, StashConfig};

/// Main entry point for the stash maintenance daemon.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the configured driver through the registry
/// 4. Start the background purge task
/// 5. Wait for SIGINT/SIGTERM, then stop the purge task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stash=info,stashd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting stash maintenance daemon");

    let config = StashConfig::from_env();
    info!(
        "Configuration loaded: driver={}, path={}, purge_interval={}s",
        config.driver,
        config.path.display(),
        config.purge_interval
    );

    let registry = DriverRegistry::with_builtin();
    info!("Available drivers: {}", registry.list_available().join(", "));

    let driver = registry
        .build(&config.driver, &config)
        .with_context(|| format!("failed to build {} driver", config.driver))?;
    let pool = Arc::new(Pool::new(driver).with_options(config.item_options()));
    info!("Pool ready on {} driver", pool.driver().name());

    let purge_handle = spawn_purge_task(pool, config.purge_interval);
    info!("Background purge task started");

    shutdown_signal().await?;

    purge_handle.abort();
    warn!("Purge task aborted");
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    Ok(())
}
