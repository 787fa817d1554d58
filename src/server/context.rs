// src/server/context.rs

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::core::ports::Ports;
use crate::core::store::Store;

/// Everything the running server shares: configuration, the store, the
/// external ports, the shutdown signal, and the spawned task set.
pub struct ServerContext {
    pub config: Config,
    pub store: Arc<Store>,
    pub ports: Ports,
    pub shutdown_tx: broadcast::Sender<()>,
    pub tasks: JoinSet<()>,
}

impl ServerContext {
    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
