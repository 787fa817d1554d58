// src/core/resource/kinds/cluster_machine.rs

//! Cluster-machine specs: the materialized membership of a machine in a
//! cluster, its rendered config, per-machine secrets, and derived status.

use serde::{Deserialize, Serialize};

use crate::core::codec::MaybeCompressed;

/// Materialized membership of a machine in a cluster, owned by the
/// machine-set controller. The resource id is the machine id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMachineSpec {
    pub cluster: String,
    pub machine_set: String,
    /// Monotonic config generation; bumped whenever the rendered config for
    /// this machine must change.
    pub config_generation: u64,
}

/// The stage of a cluster machine's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterMachineStage {
    #[default]
    Provisioning,
    Running,
    Upgrading,
    Reconfiguring,
    Destroying,
}

/// Derived status of a cluster machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMachineStatusSpec {
    pub stage: ClusterMachineStage,
    pub ready: bool,
    pub config_up_to_date: bool,
}

/// The rendered machine config for a cluster machine, stored compressed,
/// plus a sanitized copy for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMachineConfigSpec {
    pub data: MaybeCompressed,
    pub redacted_data: MaybeCompressed,
    /// Hash of the uncompressed rendered config.
    pub config_hash: String,
    /// Hash of the render inputs (versions, patches, secrets) this config
    /// was produced from; the machine-set orchestrator compares it against
    /// the current inputs to detect staleness.
    #[serde(default)]
    pub inputs_hash: String,
    pub generation: u64,
    /// Non-empty when the last render failed; names the offending patch.
    #[serde(default)]
    pub last_render_error: String,
}

/// Result of applying the rendered config to the machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMachineConfigStatusSpec {
    /// Hash of the config last successfully applied.
    pub applied_config_hash: String,
    pub generation: u64,
    #[serde(default)]
    pub last_config_error: String,
}

/// Per-machine secret material derived from the cluster secrets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMachineSecretsSpec {
    pub data: MaybeCompressed,
}
