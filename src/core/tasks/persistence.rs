// src/core/tasks/persistence.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::metrics;
use crate::core::store::{Store, persistence::save_snapshot};

/// A task that periodically writes the store snapshot to disk, and once
/// more on shutdown.
pub struct SnapshotManager {
    store: Arc<Store>,
    path: PathBuf,
    interval: Duration,
}

impl SnapshotManager {
    pub fn new(store: Arc<Store>, path: PathBuf, interval: Duration) -> Self {
        Self {
            store,
            path,
            interval,
        }
    }

    /// Runs the main loop for the snapshot manager.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            path = %self.path.display(),
            interval = ?self.interval,
            "snapshot manager started"
        );
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup does not
        // rewrite the snapshot that was just loaded.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.save().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("snapshot manager shutting down, saving final snapshot");
                    self.save().await;
                    return;
                }
            }
        }
    }

    async fn save(&self) {
        match save_snapshot(&self.store, &self.path).await {
            Ok(()) => metrics::SNAPSHOTS_SAVED_TOTAL.inc(),
            Err(e) => error!(error = %e, "store snapshot failed"),
        }
    }
}
