// src/core/tasks/gauges.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::core::metrics;
use crate::core::resource::labels::LABEL_CONNECTED;
use crate::core::resource::{Kind, Namespace};
use crate::core::selector::{Selector, Selectors};
use crate::core::store::{ListOptions, Store};

const REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// A task that refreshes the slow-moving Prometheus gauges.
pub struct GaugeRefresher {
    store: Arc<Store>,
}

impl GaugeRefresher {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::STORE_RESOURCES.set(self.store.len() as f64);
                    let connected = self
                        .store
                        .list(
                            Namespace::Default,
                            Kind::Machine,
                            &ListOptions::selecting(Selectors::one(Selector::has(LABEL_CONNECTED))),
                        )
                        .map(|machines| machines.len())
                        .unwrap_or(0);
                    metrics::CONNECTED_MACHINES.set(connected as f64);
                }
                _ = shutdown_rx.recv() => {
                    info!("gauge refresher shutting down");
                    return;
                }
            }
        }
    }
}
