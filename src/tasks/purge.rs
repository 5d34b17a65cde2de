//! Purge Task
//!
//! Background task that periodically removes expired records from a pool's
//! driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::Pool;

/// Spawns a background task that periodically purges expired records.
///
/// Driver purges walk storage with blocking I/O, so each run is handed to
/// tokio's blocking pool.
///
/// # Arguments
/// * `pool` - Shared pool whose driver is purged
/// * `purge_interval_secs` - Interval in seconds between purge runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let pool = Arc::new(Pool::new(Arc::new(Ephemeral::new())));
/// let purge_handle = spawn_purge_task(pool.clone(), 300);
/// // Later, during shutdown:
/// purge_handle.abort();
/// ```
pub fn spawn_purge_task(pool: Arc<Pool>, purge_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(purge_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting purge task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let pool = pool.clone();
            match tokio::task::spawn_blocking(move || pool.purge()).await {
                Ok(true) => debug!("purge run complete"),
                Ok(false) => warn!("purge run finished with errors"),
                Err(e) => warn!(error = %e, "purge run panicked"),
            }
        }
    })
}
