// src/core/patch/mod.rs

//! The config-patch merge engine.
//!
//! Config patches are labeled YAML fragments with a weight encoded in the
//! `NNN-` prefix of their id. System patches occupy reserved bands; user
//! patches fall in 100-900. Patches matching a cluster machine are sorted
//! by ascending (weight, id) and applied as strategic merges over a
//! generated base config.

pub mod controller;
pub mod merge;
pub mod render;

pub use controller::ClusterMachineConfigController;
pub use render::{PatchRef, RenderInput, RenderedConfig, render};

use crate::core::Error;
use crate::core::resource::labels::{
    LABEL_CLUSTER, LABEL_CLUSTER_MACHINE, LABEL_MACHINE, LABEL_MACHINE_SET,
};
use crate::core::resource::Labels;

/// Reserved weight for the generated install-disk patch.
pub const WEIGHT_INSTALL_DISK: u32 = 0;
/// Reserved base weight for cluster-wide system patches.
pub const WEIGHT_CLUSTER_BASE: u32 = 200;
/// Reserved base weight for machine-set system patches.
pub const WEIGHT_MACHINE_SET_BASE: u32 = 400;
/// Reserved base weight for cluster-machine system patches.
pub const WEIGHT_CLUSTER_MACHINE_BASE: u32 = 400;

/// Hashes everything a machine's rendered config is derived from: the
/// cluster versions, the matching patches (id and version), the secrets
/// generation, and the advertised join endpoint. The machine-set
/// orchestrator and the render controller compute this from the same
/// inputs, so staleness detection and render gating agree.
pub fn inputs_hash(
    talos_version: &str,
    kubernetes_version: &str,
    patches: &[(String, u64)],
    secrets_generation: u64,
    api_url: &str,
) -> String {
    use sha2::{Digest, Sha256};

    let mut sorted: Vec<&(String, u64)> = patches.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(talos_version.as_bytes());
    hasher.update([0]);
    hasher.update(kubernetes_version.as_bytes());
    hasher.update([0]);
    for (id, version) in sorted {
        hasher.update(id.as_bytes());
        hasher.update(version.to_le_bytes());
    }
    hasher.update(secrets_generation.to_le_bytes());
    hasher.update(api_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parses the weight prefix (`NNN-…`) of a patch id.
pub fn weight_of(id: &str) -> Result<u32, Error> {
    let (prefix, _) = id.split_once('-').ok_or_else(|| {
        Error::InvalidArgument(format!(
            "config patch id '{id}' lacks the weight prefix 'NNN-'"
        ))
    })?;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidArgument(format!(
            "config patch id '{id}' lacks a numeric weight prefix"
        )));
    }
    prefix
        .parse::<u32>()
        .map_err(|_| Error::InvalidArgument(format!("config patch weight in '{id}' overflows")))
}

/// Whether a patch targets the given cluster machine.
///
/// Cluster-labeled patches apply to all machines of the cluster; machine-set
/// labels narrow to the set's members; cluster-machine and machine labels
/// narrow to one node. A narrower label that names a different target
/// excludes the patch.
pub fn patch_matches(
    labels: &Labels,
    cluster: &str,
    machine_set: &str,
    machine: &str,
) -> bool {
    let scoped = |key: &str, expected: &str| match labels.get(key) {
        None => None,
        Some(v) => Some(v == expected),
    };

    // Node-scoped labels win regardless of the cluster label.
    match (
        scoped(LABEL_CLUSTER_MACHINE, machine),
        scoped(LABEL_MACHINE, machine),
    ) {
        (Some(true), _) | (_, Some(true)) => return true,
        (Some(false), _) | (_, Some(false)) => return false,
        _ => {}
    }

    match scoped(LABEL_CLUSTER, cluster) {
        Some(true) => {}
        _ => return false,
    }
    match scoped(LABEL_MACHINE_SET, machine_set) {
        Some(false) => false,
        _ => true,
    }
}
