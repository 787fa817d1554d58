// src/core/cluster/controller.rs

//! The cluster lifecycle coordinator: phase aggregation, the ready
//! condition, and the teardown cascade (workers first, then control plane,
//! then link draining).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::Error;
use crate::core::resource::kinds::{
    ClusterDestroyStatusSpec, ClusterPhase, ClusterStatusSpec, MachineSetPhase, MachineSetRole,
};
use crate::core::resource::labels::{ANNOTATION_FORCE_DESTROY, LABEL_INFRA_PROVIDER};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "ClusterController";

const CASCADE_RETRY: Duration = Duration::from_secs(5);

/// Aggregates machine-set state into the cluster status and walks the
/// destroy cascade when a cluster tears down.
pub struct ClusterController;

#[async_trait]
impl Controller for ClusterController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::Cluster),
                InputSpec::weak(Kind::MachineSet),
                InputSpec::weak(Kind::MachineSetStatus),
                InputSpec::weak(Kind::ClusterBootstrapStatus),
                InputSpec::weak(Kind::KubernetesStatus),
                InputSpec::weak(Kind::ClusterMachine),
                InputSpec::weak(Kind::Link),
                InputSpec::weak(Kind::InfraMachine),
                InputSpec::weak(Kind::MachineRequest),
            ],
            outputs: vec![Kind::ClusterStatus, Kind::ClusterDestroyStatus],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let clusters = ctx.list(Namespace::Default, Kind::Cluster, &ListOptions::default())?;
        let mut waiting = false;

        for kind in [Kind::ClusterStatus, Kind::ClusterDestroyStatus] {
            for status in ctx.list(Namespace::Default, kind, &ListOptions::default())? {
                if !clusters.iter().any(|c| c.id() == status.id()) {
                    ctx.teardown_and_destroy(&status.key())?;
                }
            }
        }

        for cluster in &clusters {
            ctx.check_cancelled()?;
            if cluster.metadata.is_tearing_down() {
                waiting |= !self.destroy_cascade(ctx, cluster)?;
            } else {
                ctx.add_finalizer(&cluster.key())?;
                self.derive_status(ctx, cluster)?;
            }
        }

        if waiting {
            Ok(ReconcileOutcome::Requeue(CASCADE_RETRY))
        } else {
            Ok(ReconcileOutcome::Ok)
        }
    }
}

impl ClusterController {
    fn sets_of(&self, ctx: &ControllerContext, cluster_id: &str) -> Result<Vec<Resource>, Error> {
        let sets = ctx.list(Namespace::Default, Kind::MachineSet, &ListOptions::default())?;
        Ok(sets
            .into_iter()
            .filter(|s| {
                s.spec
                    .as_machine_set()
                    .is_some_and(|spec| spec.cluster == cluster_id)
            })
            .collect())
    }

    fn derive_status(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<(), Error> {
        let sets = self.sets_of(ctx, cluster.id())?;

        let mut machines = 0u32;
        let mut healthy = 0u32;
        let mut phase = ClusterPhase::Running;
        let mut all_running = !sets.is_empty();
        let mut last_error = String::new();

        for set in &sets {
            let Some(status) = ctx
                .get_optional(&ResourceKey::in_default(Kind::MachineSetStatus, set.id()))?
                .and_then(|r| r.spec.as_machine_set_status().cloned())
            else {
                all_running = false;
                phase = ClusterPhase::ScalingUp;
                continue;
            };
            machines += status.current_machines;
            healthy += status.healthy_machines;
            if last_error.is_empty() && !status.update_blocked.is_empty() {
                last_error = status.update_blocked.clone();
            }
            match status.phase {
                MachineSetPhase::Running => {}
                MachineSetPhase::ScalingDown | MachineSetPhase::Destroying => {
                    all_running = false;
                    phase = ClusterPhase::ScalingDown;
                }
                MachineSetPhase::ScalingUp | MachineSetPhase::Failed => {
                    all_running = false;
                    if phase == ClusterPhase::Running {
                        phase = ClusterPhase::ScalingUp;
                    }
                }
            }
        }

        let bootstrapped = ctx
            .get_optional(&ResourceKey::in_default(
                Kind::ClusterBootstrapStatus,
                cluster.id(),
            ))?
            .and_then(|r| r.spec.as_cluster_bootstrap_status().map(|s| s.bootstrapped))
            .unwrap_or(false);
        let kubernetes = ctx
            .get_optional(&ResourceKey::in_default(Kind::KubernetesStatus, cluster.id()))?
            .and_then(|r| r.spec.as_kubernetes_status().cloned())
            .unwrap_or_default();

        let ready = all_running
            && bootstrapped
            && kubernetes.api_server_ready
            && kubernetes.static_pods_ready;

        ctx.ensure(Resource::new(
            cluster.id(),
            ResourceSpec::ClusterStatus(ClusterStatusSpec {
                phase,
                ready,
                machines,
                healthy_machines: healthy,
                last_error,
            }),
        ))?;
        Ok(())
    }

    /// Walks the teardown cascade; returns true once the cluster's
    /// descendants are fully reaped and our finalizer is released.
    fn destroy_cascade(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<bool, Error> {
        let sets = self.sets_of(ctx, cluster.id())?;
        let destroy_key = ResourceKey::in_default(Kind::ClusterDestroyStatus, cluster.id());

        // Capture the member links before the memberships disappear.
        let mut pending_links: Vec<String> = ctx
            .get_optional(&destroy_key)?
            .and_then(|r| r.spec.as_cluster_destroy_status().map(|s| s.pending_links.clone()))
            .unwrap_or_default();
        let mut machines = 0u32;
        for cm in ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::default(),
        )? {
            let member = cm
                .spec
                .as_cluster_machine()
                .is_some_and(|s| s.cluster == cluster.id());
            if member {
                machines += 1;
                if !pending_links.contains(&cm.id().to_string()) {
                    pending_links.push(cm.id().to_string());
                }
            }
        }

        // Workers drain first; control-plane sets only start tearing down
        // once every worker set is gone.
        let workers_remaining = sets.iter().any(|s| {
            s.spec
                .as_machine_set()
                .is_some_and(|spec| spec.role == MachineSetRole::Worker)
        });
        let mut phase = "draining worker machine sets";
        for set in &sets {
            let Some(spec) = set.spec.as_machine_set() else {
                continue;
            };
            match spec.role {
                MachineSetRole::Worker => {
                    ctx.teardown_and_destroy(&set.key())?;
                }
                MachineSetRole::ControlPlane if !workers_remaining => {
                    phase = "draining control-plane machine sets";
                    ctx.teardown_and_destroy(&set.key())?;
                }
                MachineSetRole::ControlPlane => {}
            }
        }

        let sets_gone = self.sets_of(ctx, cluster.id())?.is_empty();
        if sets_gone {
            phase = "removing links";
            pending_links.retain(|link_id| {
                match self.try_remove_link(ctx, cluster, link_id) {
                    Ok(removed) => !removed,
                    Err(_) => true,
                }
            });
        }

        if sets_gone && pending_links.is_empty() {
            ctx.ensure(Resource::new(
                cluster.id(),
                ResourceSpec::ClusterDestroyStatus(ClusterDestroyStatusSpec {
                    phase: "destroyed".to_string(),
                    remaining_machines: 0,
                    pending_links: Vec::new(),
                }),
            ))?;
            info!(cluster = cluster.id(), "cluster descendants reaped");
            ctx.remove_finalizer(&cluster.key())?;
            return Ok(true);
        }

        ctx.ensure(Resource::new(
            cluster.id(),
            ResourceSpec::ClusterDestroyStatus(ClusterDestroyStatusSpec {
                phase: phase.to_string(),
                remaining_machines: machines,
                pending_links,
            }),
        ))?;
        Ok(false)
    }

    /// Removes a former member's link once its wipe has been acknowledged
    /// (or immediately under force-destroy). Returns true when the link is
    /// gone.
    fn try_remove_link(
        &self,
        ctx: &ControllerContext,
        cluster: &Resource,
        link_id: &str,
    ) -> Result<bool, Error> {
        let link_key = ResourceKey::in_default(Kind::Link, link_id);
        let Some(link) = ctx.get_optional(&link_key)? else {
            return Ok(true);
        };

        let force = cluster.metadata.has_annotation(ANNOTATION_FORCE_DESTROY);
        let provider_managed = link.metadata.labels.contains(LABEL_INFRA_PROVIDER);

        if provider_managed && !force {
            let wiped = self.wipe_observed(ctx, link_id)?;
            if !wiped {
                debug!(link = link_id, "waiting for provider wipe before removing link");
                return Ok(false);
            }
        }
        ctx.teardown_and_destroy(&link_key)
    }

    fn wipe_observed(&self, ctx: &ControllerContext, machine_id: &str) -> Result<bool, Error> {
        let infra = ctx
            .get_optional(&ResourceKey::new(
                Namespace::InfraProvider,
                Kind::InfraMachine,
                machine_id,
            ))?
            .and_then(|r| r.spec.as_infra_machine().cloned());
        let Some(infra) = infra else {
            return Ok(true);
        };
        if infra.wipe_id.is_empty() {
            return Ok(true);
        }
        let acknowledged = ctx
            .get_optional(&ResourceKey::new(
                Namespace::InfraProvider,
                Kind::MachineRequest,
                machine_id,
            ))?
            .and_then(|r| r.spec.as_machine_request().map(|s| s.acknowledged_wipe_id.clone()))
            .unwrap_or_default();
        Ok(acknowledged == infra.wipe_id)
    }
}
