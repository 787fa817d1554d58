// src/core/cluster/bootstrap.rs

//! One-shot etcd bootstrap for a cluster's control plane.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::core::Error;
use crate::core::ports::Ports;
use crate::core::resource::kinds::{ClusterBootstrapStatusSpec, MachineSetRole};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "ClusterBootstrapController";

const HEALTH_POLL: Duration = Duration::from_secs(5);

/// Picks the first control-plane member of each cluster, bootstraps etcd on
/// it once its config has been applied, and records the result. A
/// successful bootstrap is never repeated.
pub struct ClusterBootstrapController {
    ports: Ports,
}

impl ClusterBootstrapController {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Controller for ClusterBootstrapController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::ClusterMachine),
                InputSpec::weak(Kind::ClusterMachineConfigStatus),
                InputSpec::weak(Kind::MachineSet),
                InputSpec::weak(Kind::Cluster),
            ],
            outputs: vec![Kind::ClusterBootstrapStatus],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let clusters = ctx.list(Namespace::Default, Kind::Cluster, &ListOptions::default())?;

        for status in ctx.list(
            Namespace::Default,
            Kind::ClusterBootstrapStatus,
            &ListOptions::default(),
        )? {
            if !clusters.iter().any(|c| c.id() == status.id()) {
                ctx.teardown_and_destroy(&status.key())?;
            }
        }

        let mut polling = false;
        for cluster in &clusters {
            ctx.check_cancelled()?;
            if cluster.metadata.is_tearing_down() {
                continue;
            }
            polling |= self.bootstrap_one(ctx, cluster.id()).await?;
        }

        if polling {
            Ok(ReconcileOutcome::Requeue(HEALTH_POLL))
        } else {
            Ok(ReconcileOutcome::Ok)
        }
    }
}

impl ClusterBootstrapController {
    /// Returns true while waiting on etcd health and a timed requeue is
    /// wanted.
    async fn bootstrap_one(&self, ctx: &ControllerContext, cluster_id: &str) -> Result<bool, Error> {
        let status_key = ResourceKey::in_default(Kind::ClusterBootstrapStatus, cluster_id);
        let existing = ctx
            .get_optional(&status_key)?
            .and_then(|r| r.spec.as_cluster_bootstrap_status().cloned());

        if existing.as_ref().is_some_and(|s| s.bootstrapped) {
            return Ok(false);
        }

        if let Some(status) = existing {
            // Bootstrap was requested; flip the flag once etcd reports
            // healthy.
            let etcd = self.ports.talos.etcd_status(cluster_id).await?;
            if etcd.healthy {
                info!(cluster = cluster_id, machine = %status.bootstrap_machine, "etcd bootstrapped");
                ctx.ensure(Resource::new(
                    cluster_id,
                    ResourceSpec::ClusterBootstrapStatus(ClusterBootstrapStatusSpec {
                        bootstrapped: true,
                        bootstrap_machine: status.bootstrap_machine,
                    }),
                ))?;
                return Ok(false);
            }
            return Ok(true);
        }

        let Some(candidate) = self.first_control_plane_member(ctx, cluster_id)? else {
            return Ok(false);
        };

        // The bootstrap call waits for the candidate's config to land.
        let applied = ctx
            .get_optional(&ResourceKey::in_default(
                Kind::ClusterMachineConfigStatus,
                &candidate,
            ))?
            .and_then(|r| {
                r.spec
                    .as_cluster_machine_config_status()
                    .map(|s| !s.applied_config_hash.is_empty())
            })
            .unwrap_or(false);
        if !applied {
            return Ok(false);
        }

        let wrote = ctx.ensure(Resource::new(
            cluster_id,
            ResourceSpec::ClusterBootstrapStatus(ClusterBootstrapStatusSpec {
                bootstrapped: false,
                bootstrap_machine: candidate.clone(),
            }),
        ))?;
        if wrote {
            info!(cluster = cluster_id, machine = %candidate, "bootstrapping etcd");
            self.ports.talos.bootstrap_etcd(&candidate).await?;
        }
        Ok(true)
    }

    /// The first member of the cluster's control-plane sets, ordered by
    /// join time then id.
    fn first_control_plane_member(
        &self,
        ctx: &ControllerContext,
        cluster_id: &str,
    ) -> Result<Option<String>, Error> {
        let sets = ctx.list(Namespace::Default, Kind::MachineSet, &ListOptions::default())?;
        let cp_sets: Vec<&Resource> = sets
            .iter()
            .filter(|s| {
                s.spec.as_machine_set().is_some_and(|spec| {
                    spec.cluster == cluster_id && spec.role == MachineSetRole::ControlPlane
                })
            })
            .collect();

        let mut members: Vec<Resource> = ctx
            .list(
                Namespace::Default,
                Kind::ClusterMachine,
                &ListOptions::default(),
            )?
            .into_iter()
            .filter(|cm| {
                cm.spec
                    .as_cluster_machine()
                    .is_some_and(|spec| cp_sets.iter().any(|s| s.id() == spec.machine_set))
            })
            .collect();

        members.sort_by(|a, b| {
            a.metadata
                .created
                .cmp(&b.metadata.created)
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(members.first().map(|m| m.id().to_string()))
    }
}
