// src/server/mod.rs

use anyhow::Result;
use tracing::info;

use crate::config::Config;

mod context;
mod initialization;
mod metrics_server;
pub mod service;
mod spawner;

pub use context::ServerContext;
pub use service::ResourceService;
pub use spawner::build_scheduler;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize the store, load the snapshot, publish singletons.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn the controller scheduler and all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Wait for the shutdown signal, then drain the tasks.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = server_context.shutdown_tx.send(());
    while server_context.tasks.join_next().await.is_some() {}

    crate::core::codec::decompression_pool().debug_leak_check();
    info!("shutdown complete");
    Ok(())
}
