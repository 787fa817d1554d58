// src/server/spawner.rs

//! Spawns the controller scheduler and all background tasks.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use super::context::ServerContext;
use super::metrics_server;
use crate::core::cluster::{ClusterBootstrapController, ClusterController, SecretsController};
use crate::core::machineset::{MachineConfigApplyController, MachineSetController};
use crate::core::patch::ClusterMachineConfigController;
use crate::core::runtime::Scheduler;
use crate::core::siderolink::{
    InfraMachineController, JoinTokenStatusController, MachineController,
};
use crate::core::tasks::gauges::GaugeRefresher;
use crate::core::tasks::persistence::SnapshotManager;

/// Builds the controller set; shared between the server and the tests that
/// drive the full reconcile graph.
pub fn build_scheduler(context: &ServerContext) -> Scheduler {
    let mut scheduler = Scheduler::new(Arc::clone(&context.store));
    scheduler.register(MachineController);
    scheduler.register(JoinTokenStatusController);
    scheduler.register(InfraMachineController);
    scheduler.register(ClusterMachineConfigController::new(context.ports.clone()));
    scheduler.register(MachineConfigApplyController::new(context.ports.clone()));
    scheduler.register(MachineSetController::new(context.ports.clone()));
    scheduler.register(ClusterBootstrapController::new(context.ports.clone()));
    scheduler.register(ClusterController);
    scheduler.register(SecretsController);
    scheduler
}

pub async fn spawn_all(context: &mut ServerContext) -> Result<()> {
    let scheduler = build_scheduler(context);
    // Fail fast on a malformed graph before anything runs.
    scheduler.assemble()?;

    let shutdown_rx = context.shutdown_rx();
    context.tasks.spawn(async move {
        if let Err(e) = scheduler.run(shutdown_rx).await {
            error!(error = %e, "controller scheduler failed");
        }
    });

    let snapshot_manager = SnapshotManager::new(
        Arc::clone(&context.store),
        context.config.store.snapshot_path.clone(),
        context.config.store.snapshot_interval,
    );
    context.tasks.spawn(snapshot_manager.run(context.shutdown_rx()));

    let gauge_refresher = GaugeRefresher::new(Arc::clone(&context.store));
    context.tasks.spawn(gauge_refresher.run(context.shutdown_rx()));

    if context.config.metrics.enabled {
        let port = context.config.metrics.port;
        let store = Arc::clone(&context.store);
        let shutdown_rx = context.shutdown_rx();
        context
            .tasks
            .spawn(metrics_server::run_metrics_server(store, port, shutdown_rx));
    }

    info!("background tasks spawned");
    Ok(())
}
