// src/core/patch/controller.rs

//! The controller that renders per-machine configs from the cluster state
//! and the matching config patches.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::render::{PatchRef, RenderInput, render};
use super::{WEIGHT_INSTALL_DISK, inputs_hash, patch_matches};
use crate::core::machineset::ANNOTATION_UPDATE_SLOT;
use crate::core::codec::{MaybeCompressed, compression_config};
use crate::core::ports::Ports;
use crate::core::resource::kinds::{
    ClusterMachineConfigSpec, ClusterMachineSpec, MachineSetRole,
};
use crate::core::resource::labels::{
    ANNOTATION_BREAK_GLASS, ANNOTATION_LOCKED, ANNOTATION_UPDATE_LOCKED,
};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::siderolink::{DEFAULT_JOIN_TOKEN_ID, SIDEROLINK_API_CONFIG_ID};
use crate::core::store::ListOptions;
use crate::core::Error;

pub const NAME: &str = "ClusterMachineConfigController";

/// Renders the machine config of every cluster machine and keeps the
/// rendered copy current. Holds a finalizer on each cluster machine so the
/// rendered config outlives it no longer than teardown requires.
pub struct ClusterMachineConfigController {
    ports: Ports,
}

impl ClusterMachineConfigController {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Controller for ClusterMachineConfigController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::ClusterMachine),
                InputSpec::weak(Kind::Cluster),
                InputSpec::weak(Kind::MachineSet),
                InputSpec::weak(Kind::ConfigPatch),
                InputSpec::weak(Kind::ClusterSecrets),
                InputSpec::weak(Kind::MachineStatus),
                InputSpec::weak(Kind::SiderolinkApiConfig),
                InputSpec::weak(Kind::JoinToken),
                InputSpec::weak(Kind::DefaultJoinToken),
            ],
            outputs: vec![Kind::ClusterMachineConfig],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let machines = ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::default(),
        )?;

        // Rendered configs whose machine is gone are reaped first.
        for config in ctx.list(
            Namespace::Default,
            Kind::ClusterMachineConfig,
            &ListOptions::default(),
        )? {
            if !machines.iter().any(|cm| cm.id() == config.id()) {
                ctx.teardown_and_destroy(&config.key())?;
            }
        }

        for machine in &machines {
            ctx.check_cancelled()?;
            let Some(spec) = machine.spec.as_cluster_machine() else {
                continue;
            };

            if machine.metadata.is_tearing_down() {
                let config_key = ResourceKey::in_default(Kind::ClusterMachineConfig, machine.id());
                if ctx.teardown_and_destroy(&config_key)? {
                    ctx.remove_finalizer(&machine.key())?;
                }
                continue;
            }

            ctx.add_finalizer(&machine.key())?;
            self.render_one(ctx, machine, spec)?;
        }

        Ok(ReconcileOutcome::Ok)
    }
}

impl ClusterMachineConfigController {
    fn render_one(
        &self,
        ctx: &ControllerContext,
        machine: &Resource,
        spec: &ClusterMachineSpec,
    ) -> Result<(), Error> {
        let Some(cluster) = ctx.get_optional(&ResourceKey::in_default(Kind::Cluster, &spec.cluster))?
        else {
            debug!(machine = machine.id(), cluster = %spec.cluster, "cluster not found, skipping render");
            return Ok(());
        };

        // Locks and the break-glass taint suppress config mutation; the
        // per-machine lock lives on the user-writable Link.
        let machine_locked = ctx
            .get_optional(&ResourceKey::in_default(Kind::Link, machine.id()))?
            .is_some_and(|link| link.metadata.has_annotation(ANNOTATION_UPDATE_LOCKED));
        if cluster.metadata.has_annotation(ANNOTATION_LOCKED)
            || cluster.metadata.has_annotation(ANNOTATION_BREAK_GLASS)
            || machine_locked
        {
            return Ok(());
        }

        let cluster_spec = cluster
            .spec
            .as_cluster()
            .ok_or_else(|| Error::Internal("cluster resource carries a foreign spec".to_string()))?;

        let role = ctx
            .get_optional(&ResourceKey::in_default(Kind::MachineSet, &spec.machine_set))?
            .and_then(|set| set.spec.as_machine_set().map(|s| s.role))
            .unwrap_or(MachineSetRole::Worker);

        let secrets = ctx
            .get_optional(&ResourceKey::in_default(Kind::ClusterSecrets, &spec.cluster))?
            .and_then(|res| {
                res.spec
                    .as_cluster_secrets()
                    .map(|s| s.data.get_uncompressed())
            })
            .transpose()?;

        let api_url = ctx
            .get_optional(&ResourceKey::in_default(
                Kind::SiderolinkApiConfig,
                SIDEROLINK_API_CONFIG_ID,
            ))?
            .and_then(|res| res.spec.as_siderolink_api_config().map(|s| s.api_url.clone()))
            .unwrap_or_default();

        let join_token = self.active_join_token(ctx)?;

        let mut patches = vec![self.install_disk_patch(ctx, machine.id())?];
        let mut patch_versions: Vec<(String, u64)> = Vec::new();
        for patch in ctx.list(
            Namespace::Default,
            Kind::ConfigPatch,
            &ListOptions::default(),
        )? {
            if !patch_matches(
                &patch.metadata.labels,
                &spec.cluster,
                &spec.machine_set,
                machine.id(),
            ) {
                continue;
            }
            let Some(patch_spec) = patch.spec.as_config_patch() else {
                continue;
            };
            patch_versions.push((patch.id().to_string(), patch.metadata.version));
            patches.push(PatchRef {
                id: patch.id().to_string(),
                data: patch_spec.data.get_uncompressed()?,
            });
        }

        let secrets_generation = ctx
            .get_optional(&ResourceKey::in_default(Kind::ClusterSecrets, &spec.cluster))?
            .and_then(|res| res.spec.as_cluster_secrets().map(|s| s.generation))
            .unwrap_or(0);
        let current_inputs = inputs_hash(
            &cluster_spec.talos_version,
            &cluster_spec.kubernetes_version,
            &patch_versions,
            secrets_generation,
            &api_url,
        );

        // Rolling-update gate: a machine whose config is settled keeps it
        // until the orchestrator grants an update slot. Machines without a
        // usable config (initial provisioning, failed render) and machines
        // whose inputs have not changed render freely.
        let config_key = ResourceKey::in_default(Kind::ClusterMachineConfig, machine.id());
        let existing = ctx.get_optional(&config_key)?;
        let authorized = match &existing {
            None => true,
            Some(cfg) => match cfg.spec.as_cluster_machine_config() {
                None => true,
                Some(cfg_spec) => {
                    cfg_spec.config_hash.is_empty()
                        || cfg_spec.inputs_hash == current_inputs
                        || machine.metadata.has_annotation(ANNOTATION_UPDATE_SLOT)
                }
            },
        };
        if !authorized {
            return Ok(());
        }

        let input = RenderInput {
            cluster_id: &spec.cluster,
            cluster: cluster_spec,
            machine_id: machine.id(),
            machine_set_id: &spec.machine_set,
            role,
            secrets: secrets.as_deref(),
            join_token: &join_token,
            api_url: &api_url,
            patches,
        };

        let config = compression_config();
        let output = match render(&input, self.ports.config_loader.as_ref()) {
            Ok(rendered) => ClusterMachineConfigSpec {
                data: MaybeCompressed::from_uncompressed(&rendered.data, &config)?,
                redacted_data: MaybeCompressed::from_uncompressed(&rendered.redacted, &config)?,
                config_hash: rendered.hash,
                inputs_hash: current_inputs,
                generation: spec.config_generation,
                last_render_error: String::new(),
            },
            Err(e @ Error::InvalidConfig { .. }) => {
                warn!(machine = machine.id(), error = %e, "config render failed");
                ClusterMachineConfigSpec {
                    inputs_hash: current_inputs,
                    generation: spec.config_generation,
                    last_render_error: e.to_string(),
                    ..Default::default()
                }
            }
            Err(e) => return Err(e),
        };

        ctx.ensure(Resource::new(
            machine.id(),
            ResourceSpec::ClusterMachineConfig(output),
        ))?;
        Ok(())
    }

    /// The token machines join with: the default token when set, otherwise
    /// empty (machines already joined keep working).
    fn active_join_token(&self, ctx: &ControllerContext) -> Result<String, Error> {
        let Some(default) = ctx.get_optional(&ResourceKey::in_default(
            Kind::DefaultJoinToken,
            DEFAULT_JOIN_TOKEN_ID,
        ))?
        else {
            return Ok(String::new());
        };
        let Some(pointer) = default.spec.as_default_join_token() else {
            return Ok(String::new());
        };
        let token = ctx
            .get_optional(&ResourceKey::in_default(Kind::JoinToken, &pointer.token_id))?
            .and_then(|res| res.spec.as_join_token().map(|s| s.token.clone()))
            .unwrap_or_default();
        Ok(token)
    }

    /// The generated install-disk system patch, weight 0. Picks the
    /// machine's first reported disk, falling back to /dev/sda.
    fn install_disk_patch(&self, ctx: &ControllerContext, machine_id: &str) -> Result<PatchRef, Error> {
        let disk = ctx
            .get_optional(&ResourceKey::in_default(Kind::MachineStatus, machine_id))?
            .and_then(|res| {
                res.spec
                    .as_machine_status()
                    .and_then(|s| s.disks.first().map(|d| d.device.clone()))
            })
            .unwrap_or_else(|| "/dev/sda".to_string());

        let fragment = serde_yaml::to_string(&json!({
            "machine": { "install": { "disk": disk } },
        }))?;
        Ok(PatchRef {
            id: format!("{WEIGHT_INSTALL_DISK:03}-install-disk"),
            data: fragment.into(),
        })
    }
}
