// src/core/machineset/apply.rs

//! Applies rendered machine configs through the Talos port and reports the
//! result; on teardown it resets the machine before letting the membership
//! go.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::Error;
use crate::core::ports::Ports;
use crate::core::resource::kinds::ClusterMachineConfigStatusSpec;
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "MachineConfigApplyController";

/// Drives rendered configs onto machines and owns the per-machine
/// ClusterMachineConfigStatus. Holds a finalizer on each cluster machine so
/// teardown waits for the machine reset.
pub struct MachineConfigApplyController {
    ports: Ports,
}

impl MachineConfigApplyController {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Controller for MachineConfigApplyController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::ClusterMachineConfig),
                InputSpec::weak(Kind::ClusterMachine),
            ],
            outputs: vec![Kind::ClusterMachineConfigStatus],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let machines = ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::default(),
        )?;

        // Statuses for memberships that are fully gone are reaped.
        for status in ctx.list(
            Namespace::Default,
            Kind::ClusterMachineConfigStatus,
            &ListOptions::default(),
        )? {
            if !machines.iter().any(|cm| cm.id() == status.id()) {
                ctx.teardown_and_destroy(&status.key())?;
            }
        }

        for machine in &machines {
            ctx.check_cancelled()?;

            if machine.metadata.is_tearing_down() {
                self.release(ctx, machine).await?;
                continue;
            }
            ctx.add_finalizer(&machine.key())?;
            self.apply_one(ctx, machine).await?;
        }

        Ok(ReconcileOutcome::Ok)
    }
}

impl MachineConfigApplyController {
    async fn apply_one(&self, ctx: &ControllerContext, machine: &Resource) -> Result<(), Error> {
        let Some(config) = ctx.get_optional(&ResourceKey::in_default(
            Kind::ClusterMachineConfig,
            machine.id(),
        ))?
        else {
            return Ok(());
        };
        let Some(config_spec) = config.spec.as_cluster_machine_config() else {
            return Ok(());
        };
        if !config_spec.last_render_error.is_empty() || config_spec.config_hash.is_empty() {
            return Ok(());
        }

        let status_key = ResourceKey::in_default(Kind::ClusterMachineConfigStatus, machine.id());
        let current = ctx
            .get_optional(&status_key)?
            .and_then(|r| r.spec.as_cluster_machine_config_status().cloned());
        if current
            .as_ref()
            .is_some_and(|s| s.applied_config_hash == config_spec.config_hash)
        {
            return Ok(());
        }

        let data = config_spec.data.get_uncompressed()?;
        let outcome = self
            .ports
            .talos
            .apply_configuration(machine.id(), &data)
            .await;

        let status = match outcome {
            Ok(()) => {
                info!(machine = machine.id(), hash = %config_spec.config_hash, "machine config applied");
                ClusterMachineConfigStatusSpec {
                    applied_config_hash: config_spec.config_hash.clone(),
                    generation: config_spec.generation,
                    last_config_error: String::new(),
                }
            }
            Err(e) => {
                warn!(machine = machine.id(), error = %e, "machine config apply failed");
                ClusterMachineConfigStatusSpec {
                    applied_config_hash: current
                        .as_ref()
                        .map(|s| s.applied_config_hash.clone())
                        .unwrap_or_default(),
                    generation: config_spec.generation,
                    last_config_error: e.to_string(),
                }
            }
        };

        ctx.ensure(Resource::new(
            machine.id(),
            ResourceSpec::ClusterMachineConfigStatus(status),
        ))?;
        Ok(())
    }

    /// Teardown path: reset the machine through Talos, drop the status, and
    /// release the finalizer.
    async fn release(&self, ctx: &ControllerContext, machine: &Resource) -> Result<(), Error> {
        if !machine.metadata.finalizers.contains(ctx.name()) {
            return Ok(());
        }

        let status_key = ResourceKey::in_default(Kind::ClusterMachineConfigStatus, machine.id());
        if ctx.get_optional(&status_key)?.is_some() {
            // Only machines that ever received a config need a reset.
            if let Err(e) = self.ports.talos.reset_machine(machine.id()).await {
                warn!(machine = machine.id(), error = %e, "machine reset failed, will retry");
                return Err(e);
            }
            ctx.teardown_and_destroy(&status_key)?;
        }
        ctx.remove_finalizer(&machine.key())?;
        Ok(())
    }
}
