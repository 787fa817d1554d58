// src/core/machineset/controller.rs

//! The machine-set orchestrator.
//!
//! Per machine set, three populations are held in balance: desired
//! (MachineSetNode resources), current (ClusterMachine resources owned
//! here), and eligible (connected, accepted, unlocked machines matching the
//! class selector). Scale-up draws eligible machines in, scale-down retires
//! members (control-plane serially, gated on etcd health), and rolling
//! updates move at most `max_parallelism` members at a time.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ANNOTATION_UPDATE_SLOT, machine_eligible};
use crate::core::Error;
use crate::core::patch::{inputs_hash, patch_matches};
use crate::core::ports::Ports;
use crate::core::resource::kinds::{
    AllocationPolicy, ClusterMachineSpec, ClusterMachineStage, ClusterMachineStatusSpec,
    MachineCount, MachineSetNodeSpec, MachineSetPhase, MachineSetRole, MachineSetSpec,
    MachineSetStatusSpec,
};
use crate::core::resource::labels::{
    ANNOTATION_BREAK_GLASS, ANNOTATION_LOCKED, LABEL_CLUSTER, LABEL_MACHINE_SET,
};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::selector::{Selector, Selectors};
use crate::core::siderolink::SIDEROLINK_API_CONFIG_ID;
use crate::core::store::ListOptions;

pub const NAME: &str = "MachineSetController";

/// Delay before re-checking a gate that depends on external state (etcd
/// health, finalizer drains that emit no event we subscribe to).
const GATE_RETRY: Duration = Duration::from_secs(5);

pub struct MachineSetController {
    ports: Ports,
}

impl MachineSetController {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Controller for MachineSetController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::MachineSet),
                InputSpec::strong(Kind::MachineSetNode),
                InputSpec::weak(Kind::Machine),
                InputSpec::weak(Kind::MachineStatus),
                InputSpec::weak(Kind::ClusterMachine),
                InputSpec::weak(Kind::ClusterMachineConfig),
                InputSpec::weak(Kind::ClusterMachineConfigStatus),
                InputSpec::weak(Kind::MachineStatusSnapshot),
                InputSpec::weak(Kind::Cluster),
                InputSpec::weak(Kind::ConfigPatch),
                InputSpec::weak(Kind::ClusterSecrets),
                InputSpec::weak(Kind::SiderolinkApiConfig),
            ],
            outputs: vec![
                Kind::ClusterMachine,
                Kind::ClusterMachineStatus,
                Kind::MachineSetStatus,
                Kind::MachineSetNode,
            ],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let sets = ctx.list(Namespace::Default, Kind::MachineSet, &ListOptions::default())?;
        let mut waiting = false;

        // Members of sets that no longer exist are retired first.
        for cm in ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::default(),
        )? {
            let orphaned = cm
                .spec
                .as_cluster_machine()
                .is_some_and(|spec| !sets.iter().any(|s| s.id() == spec.machine_set));
            if orphaned {
                waiting |= !self.retire(ctx, &cm).await?;
            }
        }
        for status in ctx.list(
            Namespace::Default,
            Kind::MachineSetStatus,
            &ListOptions::default(),
        )? {
            if !sets.iter().any(|s| s.id() == status.id()) {
                ctx.teardown_and_destroy(&status.key())?;
            }
        }

        for set in &sets {
            ctx.check_cancelled()?;
            let Some(spec) = set.spec.as_machine_set() else {
                continue;
            };
            if set.metadata.is_tearing_down() {
                waiting |= !self.teardown_set(ctx, set, spec).await?;
            } else {
                waiting |= self.reconcile_set(ctx, set, spec).await?;
            }
        }

        if waiting {
            Ok(ReconcileOutcome::Requeue(GATE_RETRY))
        } else {
            Ok(ReconcileOutcome::Ok)
        }
    }
}

impl MachineSetController {
    /// Reconciles one running set. Returns true when something is still in
    /// flight and a timed requeue is wanted.
    async fn reconcile_set(
        &self,
        ctx: &ControllerContext,
        set: &Resource,
        spec: &MachineSetSpec,
    ) -> Result<bool, Error> {
        ctx.add_finalizer(&set.key())?;

        let cluster = ctx.get_optional(&ResourceKey::in_default(Kind::Cluster, &spec.cluster))?;
        let locked = cluster.as_ref().is_some_and(|c| {
            c.metadata.has_annotation(ANNOTATION_LOCKED)
                || c.metadata.has_annotation(ANNOTATION_BREAK_GLASS)
        });

        let members = self.members_of(ctx, set.id())?;
        let mut status = MachineSetStatusSpec {
            current_machines: members.len() as u32,
            ..Default::default()
        };

        let desired = match self.desired_nodes(ctx, set, spec, &members, locked) {
            Ok(desired) => desired,
            Err(e @ Error::InvalidArgument(_)) => {
                status.phase = MachineSetPhase::Failed;
                status.last_error = e.to_string();
                self.publish_status(ctx, set.id(), status)?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        status.requested_machines = desired.len() as u32;

        // Scale up: fill the deficit from eligible machines.
        if !locked {
            for node_id in &desired {
                if members.iter().any(|m| m.id() == node_id) {
                    continue;
                }
                let Some(machine) =
                    ctx.get_optional(&ResourceKey::in_default(Kind::Machine, node_id))?
                else {
                    continue;
                };
                if !machine_eligible(ctx, &machine)? {
                    debug!(machine = %node_id, set = set.id(), "desired machine not eligible yet");
                    continue;
                }
                info!(machine = %node_id, set = set.id(), "adding machine to set");
                ctx.create(
                    Resource::new(
                        node_id,
                        ResourceSpec::ClusterMachine(ClusterMachineSpec {
                            cluster: spec.cluster.clone(),
                            machine_set: set.id().to_string(),
                            config_generation: 1,
                        }),
                    )
                    .with_label(LABEL_CLUSTER, &spec.cluster)
                    .with_label(LABEL_MACHINE_SET, set.id()),
                )?;
            }
        }

        // Scale down: retire members that are no longer desired,
        // least-recently-joined first.
        let mut waiting = false;
        if !locked {
            let mut victims: Vec<&Resource> = members
                .iter()
                .filter(|m| !desired.iter().any(|id| id == m.id()))
                .collect();
            victims.sort_by(|a, b| b.metadata.created.cmp(&a.metadata.created));
            for victim in victims {
                if spec.role == MachineSetRole::ControlPlane {
                    if !self.control_plane_gate(ctx, &spec.cluster, &members, victim).await? {
                        waiting = true;
                        continue;
                    }
                }
                waiting |= !self.retire(ctx, victim).await?;
            }
        }

        waiting |= self
            .update_pass(ctx, set, spec, &members, locked, &mut status)
            .await?;

        let has_provisioning = status.healthy_machines < status.current_machines;
        status.phase = if !status.update_blocked.is_empty() {
            MachineSetPhase::Failed
        } else if (status.requested_machines > status.current_machines)
            || (has_provisioning && status.current_machines > 0)
        {
            MachineSetPhase::ScalingUp
        } else if status.requested_machines < status.current_machines {
            MachineSetPhase::ScalingDown
        } else {
            MachineSetPhase::Running
        };

        self.publish_status(ctx, set.id(), status)?;
        Ok(waiting)
    }

    /// The ids of machines this set should hold, per its allocation policy.
    fn desired_nodes(
        &self,
        ctx: &ControllerContext,
        set: &Resource,
        spec: &MachineSetSpec,
        members: &[Resource],
        locked: bool,
    ) -> Result<Vec<String>, Error> {
        let node_selector = Selectors::one(Selector::field_eq(LABEL_MACHINE_SET, set.id()));
        let mut nodes = ctx.list(
            Namespace::Default,
            Kind::MachineSetNode,
            &ListOptions::selecting(node_selector),
        )?;
        nodes.retain(|n| !n.metadata.is_tearing_down());

        let AllocationPolicy::Class { selector, count } = &spec.allocation else {
            return Ok(nodes.iter().map(|n| n.id().to_string()).collect());
        };

        let class_selector = Selector::parse(selector)?;
        let target = match count {
            MachineCount::Fixed(n) => *n as usize,
            MachineCount::Unlimited => usize::MAX,
        };

        if !locked {
            // Drop class-allocated nodes whose machine has left entirely;
            // keep nodes that still back a membership.
            for node in &nodes {
                let machine_gone = ctx
                    .get_optional(&ResourceKey::in_default(Kind::Machine, node.id()))?
                    .is_none();
                let is_member = members.iter().any(|m| m.id() == node.id());
                if machine_gone && !is_member && node.metadata.owner.is_some() {
                    ctx.teardown_and_destroy(&node.key())?;
                }
            }
            let mut nodes = ctx.list(
                Namespace::Default,
                Kind::MachineSetNode,
                &ListOptions::selecting(Selectors::one(Selector::field_eq(
                    LABEL_MACHINE_SET,
                    set.id(),
                ))),
            )?;
            nodes.retain(|n| !n.metadata.is_tearing_down());

            // Grow the pool up to the target.
            if nodes.len() < target {
                let pool = ctx.list(
                    Namespace::Default,
                    Kind::Machine,
                    &ListOptions::selecting(Selectors::one(class_selector.clone())),
                )?;
                for machine in pool {
                    if nodes.len() >= target {
                        break;
                    }
                    if nodes.iter().any(|n| n.id() == machine.id()) {
                        continue;
                    }
                    if !machine_eligible(ctx, &machine)? {
                        continue;
                    }
                    info!(machine = machine.id(), set = set.id(), "allocating machine from class pool");
                    let node = ctx.create(
                        Resource::new(machine.id(), ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                            .with_label(LABEL_CLUSTER, &spec.cluster)
                            .with_label(LABEL_MACHINE_SET, set.id()),
                    )?;
                    nodes.push(node);
                }
            }

            // Shrink: release the newest class-allocated nodes first.
            if nodes.len() > target {
                let mut excess: Vec<&Resource> = nodes
                    .iter()
                    .filter(|n| n.metadata.owner.is_some())
                    .collect();
                excess.sort_by(|a, b| b.metadata.created.cmp(&a.metadata.created));
                for node in excess.into_iter().take(nodes.len() - target) {
                    ctx.teardown_and_destroy(&node.key())?;
                }
            }

            let mut nodes = ctx.list(
                Namespace::Default,
                Kind::MachineSetNode,
                &ListOptions::selecting(Selectors::one(Selector::field_eq(
                    LABEL_MACHINE_SET,
                    set.id(),
                ))),
            )?;
            nodes.retain(|n| !n.metadata.is_tearing_down());
            return Ok(nodes.iter().map(|n| n.id().to_string()).collect());
        }

        Ok(nodes.iter().map(|n| n.id().to_string()).collect())
    }

    /// Control-plane members are destroyed one at a time, and only while
    /// etcd reports healthy.
    async fn control_plane_gate(
        &self,
        _ctx: &ControllerContext,
        cluster: &str,
        members: &[Resource],
        victim: &Resource,
    ) -> Result<bool, Error> {
        let another_in_teardown = members
            .iter()
            .any(|m| m.id() != victim.id() && m.metadata.is_tearing_down());
        if another_in_teardown {
            return Ok(false);
        }
        let etcd = self.ports.talos.etcd_status(cluster).await?;
        if !etcd.healthy {
            debug!(cluster, victim = victim.id(), "etcd not healthy, delaying control-plane scale-down");
            return Ok(false);
        }
        Ok(true)
    }

    /// Tears one member down and destroys it once its finalizers drain.
    /// Returns true when the member is fully gone.
    async fn retire(&self, ctx: &ControllerContext, cm: &Resource) -> Result<bool, Error> {
        let gone = ctx.teardown_and_destroy(&cm.key())?;
        if gone {
            info!(machine = cm.id(), "cluster machine destroyed");
            let status_key = ResourceKey::in_default(Kind::ClusterMachineStatus, cm.id());
            ctx.teardown_and_destroy(&status_key)?;
        }
        Ok(gone)
    }

    /// Tears down every member of a set, then releases the set finalizer.
    /// Returns true once all members are gone.
    async fn teardown_set(
        &self,
        ctx: &ControllerContext,
        set: &Resource,
        spec: &MachineSetSpec,
    ) -> Result<bool, Error> {
        let members = self.members_of(ctx, set.id())?;
        let mut all_gone = true;
        for member in &members {
            if spec.role == MachineSetRole::ControlPlane
                && !self
                    .control_plane_gate(ctx, &spec.cluster, &members, member)
                    .await?
            {
                all_gone = false;
                continue;
            }
            all_gone &= self.retire(ctx, member).await?;
        }
        if all_gone {
            let status_key = ResourceKey::in_default(Kind::MachineSetStatus, set.id());
            ctx.teardown_and_destroy(&status_key)?;
            ctx.remove_finalizer(&set.key())?;
        }
        Ok(all_gone)
    }

    fn members_of(&self, ctx: &ControllerContext, set_id: &str) -> Result<Vec<Resource>, Error> {
        let mut members = ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::selecting(Selectors::one(Selector::field_eq(
                LABEL_MACHINE_SET,
                set_id,
            ))),
        )?;
        members.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(members)
    }

    /// The rolling-update pass: grants and revokes update slots, derives
    /// per-member status, and surfaces apply/render failures as the set's
    /// update block. Returns true while members are mid-update.
    async fn update_pass(
        &self,
        ctx: &ControllerContext,
        set: &Resource,
        spec: &MachineSetSpec,
        members: &[Resource],
        locked: bool,
        status: &mut MachineSetStatusSpec,
    ) -> Result<bool, Error> {
        let Some(cluster) =
            ctx.get_optional(&ResourceKey::in_default(Kind::Cluster, &spec.cluster))?
        else {
            return Ok(false);
        };
        let Some(cluster_spec) = cluster.spec.as_cluster() else {
            return Ok(false);
        };

        let api_url = ctx
            .get_optional(&ResourceKey::in_default(
                Kind::SiderolinkApiConfig,
                SIDEROLINK_API_CONFIG_ID,
            ))?
            .and_then(|res| res.spec.as_siderolink_api_config().map(|s| s.api_url.clone()))
            .unwrap_or_default();
        let secrets_generation = ctx
            .get_optional(&ResourceKey::in_default(Kind::ClusterSecrets, &spec.cluster))?
            .and_then(|res| res.spec.as_cluster_secrets().map(|s| s.generation))
            .unwrap_or(0);
        let all_patches = ctx.list(
            Namespace::Default,
            Kind::ConfigPatch,
            &ListOptions::default(),
        )?;

        let member_inputs = |machine_id: &str| -> String {
            let patch_versions: Vec<(String, u64)> = all_patches
                .iter()
                .filter(|p| {
                    patch_matches(&p.metadata.labels, &spec.cluster, set.id(), machine_id)
                })
                .map(|p| (p.id().to_string(), p.metadata.version))
                .collect();
            inputs_hash(
                &cluster_spec.talos_version,
                &cluster_spec.kubernetes_version,
                &patch_versions,
                secrets_generation,
                &api_url,
            )
        };

        status.config_hash = member_inputs("");

        let mut in_flight = 0usize;
        let mut stale_candidates: Vec<String> = Vec::new();
        let mut waiting = false;

        for member in members {
            let cfg = ctx
                .get_optional(&ResourceKey::in_default(Kind::ClusterMachineConfig, member.id()))?;
            let cfg_spec = cfg.as_ref().and_then(|r| r.spec.as_cluster_machine_config());
            let applied = ctx
                .get_optional(&ResourceKey::in_default(
                    Kind::ClusterMachineConfigStatus,
                    member.id(),
                ))?
                .and_then(|r| {
                    r.spec
                        .as_cluster_machine_config_status()
                        .map(|s| (s.applied_config_hash.clone(), s.last_config_error.clone()))
                });
            let (applied_hash, apply_error) = applied.unwrap_or_default();
            let snapshot_ready = ctx
                .get_optional(&ResourceKey::new(
                    Namespace::Ephemeral,
                    Kind::MachineStatusSnapshot,
                    member.id(),
                ))?
                .and_then(|r| r.spec.as_machine_status_snapshot().map(|s| s.ready))
                .unwrap_or(false);

            let released_hash = cfg_spec.map(|s| s.config_hash.clone()).unwrap_or_default();
            let render_error = cfg_spec
                .map(|s| s.last_render_error.clone())
                .unwrap_or_default();
            let current_inputs = member_inputs(member.id());
            let stale = cfg_spec
                .map(|s| !s.config_hash.is_empty() && s.inputs_hash != current_inputs)
                .unwrap_or(false);
            let provisioning = released_hash.is_empty() || applied_hash.is_empty();
            let config_up_to_date = !provisioning && applied_hash == released_hash;
            let has_slot = member.metadata.has_annotation(ANNOTATION_UPDATE_SLOT);
            let ready = snapshot_ready && config_up_to_date && !stale;

            if status.update_blocked.is_empty() {
                if !apply_error.is_empty() {
                    status.update_blocked = apply_error.clone();
                } else if !render_error.is_empty() {
                    status.update_blocked = render_error.clone();
                }
            }

            if has_slot {
                if !stale && config_up_to_date && snapshot_ready {
                    // Candidate advanced; release its slot.
                    self.set_slot(ctx, member, false)?;
                } else {
                    in_flight += 1;
                    waiting = true;
                }
            } else if stale && config_up_to_date {
                stale_candidates.push(member.id().to_string());
            }

            let stage = if member.metadata.is_tearing_down() {
                ClusterMachineStage::Destroying
            } else if provisioning {
                ClusterMachineStage::Provisioning
            } else if has_slot {
                ClusterMachineStage::Upgrading
            } else {
                ClusterMachineStage::Running
            };

            if ready {
                status.healthy_machines += 1;
            }
            ctx.ensure(
                Resource::new(
                    member.id(),
                    ResourceSpec::ClusterMachineStatus(ClusterMachineStatusSpec {
                        stage,
                        ready,
                        config_up_to_date,
                    }),
                )
                .with_label(LABEL_CLUSTER, &spec.cluster)
                .with_label(LABEL_MACHINE_SET, set.id()),
            )?;
        }

        // Grant fresh slots in deterministic order, up to the strategy's
        // parallelism, unless a failed candidate blocks the rollout.
        if !locked && status.update_blocked.is_empty() {
            let max = spec.update_strategy.max_parallelism.max(1) as usize;
            stale_candidates.sort();
            for candidate in stale_candidates {
                if in_flight >= max {
                    break;
                }
                let Some(member) = members.iter().find(|m| m.id() == candidate) else {
                    continue;
                };
                info!(machine = %candidate, set = set.id(), "starting rolling update");
                self.set_slot(ctx, member, true)?;
                in_flight += 1;
                waiting = true;
            }
        }

        Ok(waiting)
    }

    /// Grants or revokes a member's update slot; the slot also bumps the
    /// member's config generation so the new render is traceable.
    fn set_slot(&self, ctx: &ControllerContext, member: &Resource, grant: bool) -> Result<(), Error> {
        let mut next = ctx.get(&member.key())?;
        let changed = if grant {
            next.metadata
                .annotations
                .insert(ANNOTATION_UPDATE_SLOT.to_string(), String::new())
                .is_none()
        } else {
            next.metadata
                .annotations
                .shift_remove(ANNOTATION_UPDATE_SLOT)
                .is_some()
        };
        if !changed {
            return Ok(());
        }
        if grant {
            if let Some(spec) = next.spec.as_cluster_machine_mut() {
                spec.config_generation += 1;
            }
        }
        ctx.update(next)?;
        Ok(())
    }

    fn publish_status(
        &self,
        ctx: &ControllerContext,
        set_id: &str,
        status: MachineSetStatusSpec,
    ) -> Result<(), Error> {
        if let Err(e) = ctx.ensure(Resource::new(
            set_id,
            ResourceSpec::MachineSetStatus(status),
        )) {
            warn!(set = set_id, error = %e, "failed to publish machine-set status");
            return Err(e);
        }
        Ok(())
    }
}
