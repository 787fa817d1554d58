// src/core/siderolink/machines.rs

//! Derives Machine and MachineStatus resources from overlay-tunnel links,
//! and maintains the connected/accepted/allocated system labels that gate
//! machine allocation.

use async_trait::async_trait;
use tracing::debug;

use super::generate_token;
use crate::core::Error;
use crate::core::resource::kinds::{
    AcceptanceStatus, LinkSpec, MachineSpec, MachineStatusSpec, NodeUniqueTokenStatus,
};
use crate::core::resource::labels::{
    LABEL_ACCEPTED, LABEL_ALLOCATED, LABEL_CONNECTED, LABEL_INFRA_PROVIDER,
};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "MachineController";

/// Materializes a Machine (and its MachineStatus) for every Link, and keeps
/// the per-node unique token assigned.
pub struct MachineController;

#[async_trait]
impl Controller for MachineController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::Link),
                InputSpec::weak(Kind::InfraMachineConfig),
                InputSpec::weak(Kind::ClusterMachine),
            ],
            outputs: vec![Kind::Machine, Kind::MachineStatus],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let links = ctx.list(Namespace::Default, Kind::Link, &ListOptions::default())?;

        // Machines whose link disappeared entirely are reaped.
        for machine in ctx.list(Namespace::Default, Kind::Machine, &ListOptions::default())? {
            if !links.iter().any(|l| l.id() == machine.id()) {
                ctx.teardown_and_destroy(&machine.key())?;
                let status_key = ResourceKey::in_default(Kind::MachineStatus, machine.id());
                ctx.teardown_and_destroy(&status_key)?;
            }
        }

        for link in &links {
            ctx.check_cancelled()?;
            let Some(link_spec) = link.spec.as_link() else {
                continue;
            };

            if link.metadata.is_tearing_down() {
                let machine_key = ResourceKey::in_default(Kind::Machine, link.id());
                let status_key = ResourceKey::in_default(Kind::MachineStatus, link.id());
                let machine_gone = ctx.teardown_and_destroy(&machine_key)?;
                let status_gone = ctx.teardown_and_destroy(&status_key)?;
                if machine_gone && status_gone {
                    ctx.remove_finalizer(&link.key())?;
                }
                continue;
            }
            ctx.add_finalizer(&link.key())?;

            self.assign_unique_token(ctx, link, link_spec)?;
            self.materialize(ctx, link, link_spec)?;
        }

        Ok(ReconcileOutcome::Ok)
    }
}

impl MachineController {
    /// A connected node without a unique token gets one; the token is
    /// written back into the link so the node can persist it in its META
    /// partition on the next handshake.
    fn assign_unique_token(
        &self,
        ctx: &ControllerContext,
        link: &Resource,
        spec: &LinkSpec,
    ) -> Result<(), Error> {
        if !spec.node_unique_token.is_empty() || !spec.connected {
            return Ok(());
        }
        debug!(link = link.id(), "assigning node unique token");
        let mut next = link.clone();
        let link_spec = next
            .spec
            .as_link_mut()
            .ok_or_else(|| Error::Internal("link resource carries a foreign spec".to_string()))?;
        link_spec.node_unique_token = generate_token()?;
        link_spec.node_unique_token_status = NodeUniqueTokenStatus::Persistent;
        ctx.update(next)?;
        Ok(())
    }

    fn materialize(
        &self,
        ctx: &ControllerContext,
        link: &Resource,
        spec: &LinkSpec,
    ) -> Result<(), Error> {
        let provider = link.metadata.labels.get(LABEL_INFRA_PROVIDER);

        let accepted = match provider {
            None => true,
            Some(_) => {
                let config_key = ResourceKey::in_default(Kind::InfraMachineConfig, link.id());
                ctx.get_optional(&config_key)?
                    .and_then(|res| res.spec.as_infra_machine_config().map(|c| c.acceptance))
                    .unwrap_or(AcceptanceStatus::Pending)
                    == AcceptanceStatus::Accepted
            }
        };

        let allocated = ctx
            .get_optional(&ResourceKey::in_default(Kind::ClusterMachine, link.id()))?
            .is_some();

        let mut machine = Resource::new(
            link.id(),
            ResourceSpec::Machine(MachineSpec {
                provider_id: provider.map(str::to_string),
                management_address: spec.node_subnet.clone(),
            }),
        );
        if let Some(provider) = provider {
            machine = machine.with_label(LABEL_INFRA_PROVIDER, provider);
        }
        if spec.connected {
            machine = machine.with_label(LABEL_CONNECTED, "");
        }
        if accepted {
            machine = machine.with_label(LABEL_ACCEPTED, "");
        }
        if allocated {
            machine = machine.with_label(LABEL_ALLOCATED, "");
        }
        ctx.ensure(machine)?;

        ctx.ensure(Resource::new(
            link.id(),
            ResourceSpec::MachineStatus(MachineStatusSpec {
                connected: spec.connected,
                hostname: link.id().to_string(),
                addresses: vec![spec.node_subnet.clone()],
                ..Default::default()
            }),
        ))?;
        Ok(())
    }
}
