// src/core/resource/kinds/machine_set.rs

//! Machine-set specs: allocation policy, update strategy, node assignment,
//! and the derived machine-set status.

use serde::{Deserialize, Serialize};

/// The role of a machine set within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineSetRole {
    ControlPlane,
    #[default]
    Worker,
}

/// How many machines a class-based pool should hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineCount {
    Fixed(u32),
    /// Grab every eligible machine matching the class.
    Unlimited,
}

/// Machine allocation policy for a set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicy {
    /// Machines are assigned by explicitly created MachineSetNode resources.
    #[default]
    Manual,
    /// Machines are drawn from the pool matching a class selector.
    Class {
        /// Selector expression over machine labels.
        selector: String,
        count: MachineCount,
    },
}

/// Rolling-update strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStrategy {
    /// Maximum number of machines reconfigured or upgraded at once.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: u32,
}

fn default_max_parallelism() -> u32 {
    1
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self { max_parallelism: 1 }
    }
}

/// Desired state of a machine set, child of a Cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSetSpec {
    pub cluster: String,
    pub role: MachineSetRole,
    #[serde(default)]
    pub allocation: AllocationPolicy,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

/// Declarative assignment of a machine to a machine set.
/// The resource id is the machine id; targeting is carried by labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSetNodeSpec {}

/// The phase of a machine set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineSetPhase {
    #[default]
    ScalingUp,
    Running,
    ScalingDown,
    Destroying,
    Failed,
}

/// Derived status of a machine set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSetStatusSpec {
    pub phase: MachineSetPhase,
    pub requested_machines: u32,
    pub current_machines: u32,
    pub healthy_machines: u32,
    /// Hash of the currently desired rendered config; a change triggers a
    /// rolling update.
    #[serde(default)]
    pub config_hash: String,
    /// Non-empty while a failed update candidate blocks the rollout; holds
    /// the failure description until the operator clears it.
    #[serde(default)]
    pub update_blocked: String,
    #[serde(default)]
    pub last_error: String,
}
