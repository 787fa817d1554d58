// tests/support/mod.rs

//! Shared test harness: an in-memory control plane with settable Talos
//! state and manually driven reconciles.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::watch;

use omnid::core::cluster::{ClusterBootstrapController, ClusterController, SecretsController};
use omnid::core::machineset::{MachineConfigApplyController, MachineSetController};
use omnid::core::patch::ClusterMachineConfigController;
use omnid::core::ports::noop::{
    HashingImageFactory, MemoryBackupStore, RecordingKubernetes, StaticIdentity, StaticTalos,
    YamlConfigLoader,
};
use omnid::core::ports::Ports;
use omnid::core::resource::kinds::SiderolinkApiConfigSpec;
use omnid::core::resource::{Resource, ResourceSpec};
use omnid::core::runtime::{Controller, ControllerContext};
use omnid::core::siderolink::{
    InfraMachineController, JoinTokenStatusController, MachineController,
    SIDEROLINK_API_CONFIG_ID,
};
use omnid::core::store::{Store, Writer};
use omnid::server::ResourceService;

/// An in-memory control plane whose controllers are stepped by hand.
pub struct TestPlane {
    pub store: Arc<Store>,
    pub talos: Arc<StaticTalos>,
    pub ports: Ports,
    pub service: ResourceService,
    controllers: Vec<(Box<dyn Controller>, ControllerContext)>,
    _cancel_tx: watch::Sender<bool>,
}

impl TestPlane {
    pub fn new() -> Self {
        let store = Arc::new(Store::new());
        let talos = Arc::new(StaticTalos::default());
        let ports = Ports {
            image_factory: Arc::new(HashingImageFactory),
            talos: Arc::clone(&talos) as Arc<dyn omnid::core::ports::TalosClient>,
            config_loader: Arc::new(YamlConfigLoader),
            kubernetes: Arc::new(RecordingKubernetes::default()),
            backup: Arc::new(MemoryBackupStore::default()),
            identity: Arc::new(StaticIdentity),
        };
        let service = ResourceService::new(Arc::clone(&store));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let controllers: Vec<Box<dyn Controller>> = vec![
            Box::new(MachineController),
            Box::new(JoinTokenStatusController),
            Box::new(InfraMachineController),
            Box::new(SecretsController),
            Box::new(ClusterMachineConfigController::new(ports.clone())),
            Box::new(MachineConfigApplyController::new(ports.clone())),
            Box::new(MachineSetController::new(ports.clone())),
            Box::new(ClusterBootstrapController::new(ports.clone())),
            Box::new(ClusterController),
        ];
        let controllers = controllers
            .into_iter()
            .map(|controller| {
                let name = controller.definition().name;
                let ctx = ControllerContext::new(Arc::clone(&store), name, cancel_rx.clone());
                (controller, ctx)
            })
            .collect();

        Self {
            store,
            talos,
            ports,
            service,
            controllers,
            _cancel_tx: cancel_tx,
        }
    }

    /// Publishes the singleton join-endpoint config most flows expect.
    pub fn with_siderolink_config(self) -> Self {
        self.store
            .create(
                &Writer::External,
                Resource::new(
                    SIDEROLINK_API_CONFIG_ID,
                    ResourceSpec::SiderolinkApiConfig(SiderolinkApiConfigSpec {
                        api_url: "https://omnid.test:8090".to_string(),
                        events_port: 8090,
                        logs_port: 8092,
                        use_grpc_tunnel: false,
                    }),
                ),
            )
            .expect("siderolink config create");
        self
    }

    /// Runs every controller's reconcile once, in registration order.
    pub async fn step(&self) {
        for (controller, ctx) in &self.controllers {
            controller
                .reconcile(ctx)
                .await
                .unwrap_or_else(|e| panic!("{} reconcile failed: {e}", ctx.name()));
        }
    }

    /// Runs enough rounds for the graph to converge in tests.
    pub async fn settle(&self) {
        for _ in 0..8 {
            self.step().await;
        }
    }

    /// Runs one named controller's reconcile.
    pub async fn reconcile(&self, name: &str) {
        for (controller, ctx) in &self.controllers {
            if ctx.name() == name {
                controller
                    .reconcile(ctx)
                    .await
                    .unwrap_or_else(|e| panic!("{name} reconcile failed: {e}"));
                return;
            }
        }
        panic!("unknown controller '{name}'");
    }
}

/// Registers a connected, non-provider machine through the join path.
pub fn join_machine(plane: &TestPlane, machine_id: &str, token: &str) {
    plane
        .service
        .register_link(
            machine_id,
            &format!("pubkey-{machine_id}"),
            &format!("fdae:41e4:649b:9303::{machine_id}/64"),
            "203.0.113.7:51820",
            None,
            token,
        )
        .expect("link registration");
}
