// src/core/resource/registry.rs

//! The closed registry of namespaces and resource kinds.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// The closed set of store namespaces, each with its own persistence policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Namespace {
    /// Persistent user and controller state.
    Default,
    /// Recomputed on restart; never persisted.
    Ephemeral,
    /// Non-persisted counters.
    Metrics,
    /// Synthesized resources.
    Virtual,
    /// Proxied resources.
    External,
    /// Infrastructure-provider contract state; persistent.
    InfraProvider,
    /// Infrastructure-provider runtime state; never persisted.
    InfraProviderEphemeral,
    /// Node META partition mirror; persistent.
    Meta,
}

impl Namespace {
    /// Whether resources in this namespace survive a restart.
    pub fn is_persistent(&self) -> bool {
        match self {
            Namespace::Default | Namespace::InfraProvider | Namespace::Meta => true,
            Namespace::Ephemeral
            | Namespace::Metrics
            | Namespace::Virtual
            | Namespace::External
            | Namespace::InfraProviderEphemeral => false,
        }
    }
}

/// The closed set of resource kinds known at compile time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[strum(serialize_all = "PascalCase")]
pub enum Kind {
    // Cluster family.
    Cluster,
    ClusterStatus,
    ClusterSecrets,
    ImportedClusterSecrets,
    SecretRotation,
    ClusterBootstrapStatus,
    ClusterDestroyStatus,
    KubernetesStatus,
    ClusterWorkloadProxyStatus,
    ExposedService,

    // Machine-set family.
    MachineSet,
    MachineSetNode,
    MachineSetStatus,

    // Cluster-machine family.
    ClusterMachine,
    ClusterMachineStatus,
    ClusterMachineSecrets,
    ClusterMachineConfig,
    ClusterMachineConfigStatus,

    // Machine family.
    Machine,
    MachineStatus,
    MachineStatusSnapshot,
    MachineStatusLink,

    // Config patches.
    ConfigPatch,

    // SideroLink family.
    Link,
    JoinToken,
    JoinTokenStatus,
    JoinTokenUsage,
    DefaultJoinToken,
    SiderolinkApiConfig,

    // Infrastructure-provider contract.
    InfraMachine,
    InfraMachineConfig,
    MachineRequest,

    // Runtime health.
    ControllerStatus,
}

impl Kind {
    /// The namespace a kind's resources normally live in.
    pub fn default_namespace(&self) -> Namespace {
        match self {
            Kind::InfraMachine | Kind::MachineRequest => Namespace::InfraProvider,
            Kind::MachineStatusSnapshot | Kind::MachineStatusLink => Namespace::Ephemeral,
            Kind::ControllerStatus => Namespace::Metrics,
            _ => Namespace::Default,
        }
    }

    /// Status kinds are derived state. Controller dependency cycles are
    /// legal only when broken by an edge through a status kind.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            Kind::ClusterStatus
                | Kind::ClusterBootstrapStatus
                | Kind::ClusterDestroyStatus
                | Kind::KubernetesStatus
                | Kind::ClusterWorkloadProxyStatus
                | Kind::MachineSetStatus
                | Kind::ClusterMachineStatus
                | Kind::ClusterMachineConfigStatus
                | Kind::MachineStatus
                | Kind::MachineStatusSnapshot
                | Kind::MachineStatusLink
                | Kind::JoinTokenStatus
                | Kind::ControllerStatus
        )
    }
}
