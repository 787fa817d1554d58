// src/core/resource/kinds/cluster.rs

//! Cluster-level resource specs: desired state, aggregated status, the
//! bootstrap and destroy markers, and workload proxying.

use serde::{Deserialize, Serialize};

/// Desired state of a cluster, created by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub talos_version: String,
    pub kubernetes_version: String,
}

/// Aggregated cluster phase, derived from the union of machine-set phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterPhase {
    #[default]
    ScalingUp,
    Running,
    ScalingDown,
    Destroying,
}

/// Derived cluster status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatusSpec {
    pub phase: ClusterPhase,
    /// True iff all machine-sets are running, etcd has bootstrapped, and the
    /// Kubernetes control plane reports ready.
    pub ready: bool,
    pub machines: u32,
    pub healthy_machines: u32,
    #[serde(default)]
    pub last_error: String,
}

/// Marks the one-shot etcd bootstrap of a cluster's control plane.
/// Never rewritten after `bootstrapped` turns true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterBootstrapStatusSpec {
    pub bootstrapped: bool,
    /// The cluster machine that performed the bootstrap.
    pub bootstrap_machine: String,
}

/// Progress of a cluster teardown cascade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDestroyStatusSpec {
    /// Human-readable description of the current reap phase.
    pub phase: String,
    pub remaining_machines: u32,
    /// Links of former members still waiting for their wipe
    /// acknowledgement before removal.
    #[serde(default)]
    pub pending_links: Vec<String>,
}

/// Observed state of the cluster's Kubernetes control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesStatusSpec {
    pub api_server_ready: bool,
    pub static_pods_ready: bool,
}

/// Health of the workload proxy for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterWorkloadProxyStatusSpec {
    pub num_exposed_services: u32,
}

/// An in-cluster HTTP service exposed through the workload proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposedServiceSpec {
    pub port: u16,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub icon_base64: String,
}
