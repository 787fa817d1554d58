// src/core/resource/kinds/mod.rs

//! Typed spec payloads, one per resource kind, and the tagged `ResourceSpec`
//! registry that carries them inside the shared envelope.

pub mod cluster;
pub mod cluster_machine;
pub mod config_patch;
pub mod infra;
pub mod machine;
pub mod machine_set;
pub mod runtime;
pub mod secrets;
pub mod siderolink;

use serde::{Deserialize, Serialize};

use super::registry::Kind;
pub use cluster::*;
pub use cluster_machine::*;
pub use config_patch::*;
pub use infra::*;
pub use machine::*;
pub use machine_set::*;
pub use runtime::*;
pub use secrets::*;
pub use siderolink::*;

/// Generates the tagged-variant spec registry: the enum itself, the
/// kind mapping, and typed accessors used by controllers.
macro_rules! resource_specs {
    ( $( $variant:ident ( $spec:ty ) => $as:ident, $as_mut:ident; )+ ) => {
        /// The spec payload of a resource, one variant per kind.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ResourceSpec {
            $( $variant($spec), )+
        }

        impl ResourceSpec {
            /// The kind this spec belongs to.
            pub fn kind(&self) -> Kind {
                match self {
                    $( ResourceSpec::$variant(_) => Kind::$variant, )+
                }
            }

            $(
                pub fn $as(&self) -> Option<&$spec> {
                    match self {
                        ResourceSpec::$variant(spec) => Some(spec),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $spec> {
                    match self {
                        ResourceSpec::$variant(spec) => Some(spec),
                        _ => None,
                    }
                }
            )+
        }
    };
}

resource_specs! {
    Cluster(ClusterSpec) => as_cluster, as_cluster_mut;
    ClusterStatus(ClusterStatusSpec) => as_cluster_status, as_cluster_status_mut;
    ClusterSecrets(ClusterSecretsSpec) => as_cluster_secrets, as_cluster_secrets_mut;
    ImportedClusterSecrets(ImportedClusterSecretsSpec) => as_imported_cluster_secrets, as_imported_cluster_secrets_mut;
    SecretRotation(SecretRotationSpec) => as_secret_rotation, as_secret_rotation_mut;
    ClusterBootstrapStatus(ClusterBootstrapStatusSpec) => as_cluster_bootstrap_status, as_cluster_bootstrap_status_mut;
    ClusterDestroyStatus(ClusterDestroyStatusSpec) => as_cluster_destroy_status, as_cluster_destroy_status_mut;
    KubernetesStatus(KubernetesStatusSpec) => as_kubernetes_status, as_kubernetes_status_mut;
    ClusterWorkloadProxyStatus(ClusterWorkloadProxyStatusSpec) => as_cluster_workload_proxy_status, as_cluster_workload_proxy_status_mut;
    ExposedService(ExposedServiceSpec) => as_exposed_service, as_exposed_service_mut;
    MachineSet(MachineSetSpec) => as_machine_set, as_machine_set_mut;
    MachineSetNode(MachineSetNodeSpec) => as_machine_set_node, as_machine_set_node_mut;
    MachineSetStatus(MachineSetStatusSpec) => as_machine_set_status, as_machine_set_status_mut;
    ClusterMachine(ClusterMachineSpec) => as_cluster_machine, as_cluster_machine_mut;
    ClusterMachineStatus(ClusterMachineStatusSpec) => as_cluster_machine_status, as_cluster_machine_status_mut;
    ClusterMachineSecrets(ClusterMachineSecretsSpec) => as_cluster_machine_secrets, as_cluster_machine_secrets_mut;
    ClusterMachineConfig(ClusterMachineConfigSpec) => as_cluster_machine_config, as_cluster_machine_config_mut;
    ClusterMachineConfigStatus(ClusterMachineConfigStatusSpec) => as_cluster_machine_config_status, as_cluster_machine_config_status_mut;
    Machine(MachineSpec) => as_machine, as_machine_mut;
    MachineStatus(MachineStatusSpec) => as_machine_status, as_machine_status_mut;
    MachineStatusSnapshot(MachineStatusSnapshotSpec) => as_machine_status_snapshot, as_machine_status_snapshot_mut;
    MachineStatusLink(MachineStatusLinkSpec) => as_machine_status_link, as_machine_status_link_mut;
    ConfigPatch(ConfigPatchSpec) => as_config_patch, as_config_patch_mut;
    Link(LinkSpec) => as_link, as_link_mut;
    JoinToken(JoinTokenSpec) => as_join_token, as_join_token_mut;
    JoinTokenStatus(JoinTokenStatusSpec) => as_join_token_status, as_join_token_status_mut;
    JoinTokenUsage(JoinTokenUsageSpec) => as_join_token_usage, as_join_token_usage_mut;
    DefaultJoinToken(DefaultJoinTokenSpec) => as_default_join_token, as_default_join_token_mut;
    SiderolinkApiConfig(SiderolinkApiConfigSpec) => as_siderolink_api_config, as_siderolink_api_config_mut;
    InfraMachine(InfraMachineSpec) => as_infra_machine, as_infra_machine_mut;
    InfraMachineConfig(InfraMachineConfigSpec) => as_infra_machine_config, as_infra_machine_config_mut;
    MachineRequest(MachineRequestSpec) => as_machine_request, as_machine_request_mut;
    ControllerStatus(ControllerStatusSpec) => as_controller_status, as_controller_status_mut;
}
