// src/core/siderolink/infra.rs

//! The infrastructure-provider contract: projects user acceptance and power
//! intent toward the provider and drives the wipe protocol.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::core::Error;
use crate::core::resource::kinds::{AcceptanceStatus, InfraMachineSpec, PowerState};
use crate::core::resource::labels::LABEL_INFRA_PROVIDER;
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "InfraMachineController";

/// Marks an InfraMachine that currently backs a cluster membership; used to
/// notice the membership ending so the wipe id can rotate exactly once.
const ANNOTATION_ALLOCATED: &str = "omnid.internal/allocated";

/// Owns the InfraMachine projection for every provider-managed machine:
/// acceptance, power intent, the per-node unique token, and the wipe id
/// that tells the provider when to erase a returned machine.
pub struct InfraMachineController;

#[async_trait]
impl Controller for InfraMachineController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::InfraMachineConfig),
                InputSpec::weak(Kind::Machine),
                InputSpec::weak(Kind::ClusterMachine),
                InputSpec::weak(Kind::Link),
            ],
            outputs: vec![Kind::InfraMachine],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let machines = ctx.list(
            Namespace::Default,
            Kind::Machine,
            &ListOptions::selecting(crate::core::selector::Selector::has(LABEL_INFRA_PROVIDER)),
        )?;

        // Projections for machines that left entirely are reaped.
        for infra in ctx.list(
            Namespace::InfraProvider,
            Kind::InfraMachine,
            &ListOptions::default(),
        )? {
            if !machines.iter().any(|m| m.id() == infra.id()) {
                ctx.teardown_and_destroy(&infra.key())?;
            }
        }

        for machine in &machines {
            ctx.check_cancelled()?;
            let Some(provider) = machine.metadata.labels.get(LABEL_INFRA_PROVIDER) else {
                continue;
            };

            let config = ctx
                .get_optional(&ResourceKey::in_default(Kind::InfraMachineConfig, machine.id()))?;
            let (acceptance, power_state) = config
                .as_ref()
                .and_then(|res| res.spec.as_infra_machine_config())
                .map(|c| (c.acceptance, c.power_state))
                .unwrap_or((AcceptanceStatus::Pending, PowerState::PoweredOn));

            let node_unique_token = ctx
                .get_optional(&ResourceKey::in_default(Kind::Link, machine.id()))?
                .and_then(|res| res.spec.as_link().map(|l| l.node_unique_token.clone()))
                .unwrap_or_default();

            let allocated = ctx
                .get_optional(&ResourceKey::in_default(Kind::ClusterMachine, machine.id()))?
                .is_some();

            let current = ctx.get_optional(&ResourceKey::new(
                Namespace::InfraProvider,
                Kind::InfraMachine,
                machine.id(),
            ))?;
            let (mut wipe_id, mut install_event_id, was_allocated) = current
                .as_ref()
                .map(|res| {
                    let spec = res.spec.as_infra_machine();
                    (
                        spec.map(|s| s.wipe_id.clone()).unwrap_or_default(),
                        spec.map(|s| s.install_event_id).unwrap_or(0),
                        res.metadata.has_annotation(ANNOTATION_ALLOCATED),
                    )
                })
                .unwrap_or_default();

            // The machine just left a cluster: rotate the wipe id so the
            // provider erases the disk before the machine re-enters the
            // free pool. Install-event comparisons only ever increase.
            if was_allocated && !allocated {
                wipe_id = Uuid::new_v4().to_string();
                install_event_id += 1;
                info!(machine = machine.id(), wipe_id = %wipe_id, "machine released, rotating wipe id");
                // The wipe erases the node's META partition, so the stored
                // unique token dies with it; clearing the link makes the
                // machine controller issue a fresh one on reconnect.
                self.reset_unique_token(ctx, machine.id())?;
            }

            let mut next = Resource::new(
                machine.id(),
                ResourceSpec::InfraMachine(InfraMachineSpec {
                    provider: provider.to_string(),
                    acceptance,
                    power_state,
                    wipe_id,
                    install_event_id,
                    node_unique_token,
                }),
            );
            if allocated {
                next.metadata
                    .annotations
                    .insert(ANNOTATION_ALLOCATED.to_string(), String::new());
            }
            ctx.ensure(next)?;
        }

        Ok(ReconcileOutcome::Ok)
    }
}

impl InfraMachineController {
    fn reset_unique_token(&self, ctx: &ControllerContext, machine_id: &str) -> Result<(), Error> {
        let link_key = ResourceKey::in_default(Kind::Link, machine_id);
        let Some(mut link) = ctx.get_optional(&link_key)? else {
            return Ok(());
        };
        let Some(spec) = link.spec.as_link_mut() else {
            return Ok(());
        };
        if spec.node_unique_token.is_empty() {
            return Ok(());
        }
        spec.node_unique_token.clear();
        spec.node_unique_token_status =
            crate::core::resource::kinds::NodeUniqueTokenStatus::Unknown;
        ctx.update(link)?;
        Ok(())
    }
}
