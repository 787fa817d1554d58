// src/core/resource/labels.rs

//! Label maps and the reserved system-label namespace.
//!
//! Labels carry both user tags and controller-maintained markers. System
//! markers live under the reserved `omni.sidero.dev/` prefix and are
//! rejected from writes that do not come from the owning controller.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::Error;

/// The reserved prefix for controller-maintained system labels.
pub const SYSTEM_PREFIX: &str = "omni.sidero.dev/";

// --- User-facing targeting labels (no reserved prefix) ---

/// Targets a resource at a cluster.
pub const LABEL_CLUSTER: &str = "cluster";
/// Targets a resource at a machine set.
pub const LABEL_MACHINE_SET: &str = "machine-set";
/// Targets a config patch at a single cluster machine.
pub const LABEL_CLUSTER_MACHINE: &str = "cluster-machine";
/// Targets a config patch at a single machine.
pub const LABEL_MACHINE: &str = "machine";
/// Machine-class tag matched by class-based allocation.
pub const LABEL_MACHINE_CLASS: &str = "machine-class";

// --- System markers (controller-maintained) ---

/// Set on a Machine whose link is established.
pub const LABEL_CONNECTED: &str = "omni.sidero.dev/connected";
/// Set on a Machine once its infra acceptance gate has passed.
pub const LABEL_ACCEPTED: &str = "omni.sidero.dev/accepted";
/// Set on a Machine that is currently a member of some cluster.
pub const LABEL_ALLOCATED: &str = "omni.sidero.dev/allocated";
/// Set on a Machine discovered through an infrastructure provider.
pub const LABEL_INFRA_PROVIDER: &str = "omni.sidero.dev/infra-provider";
/// Marks the control-plane machine set of a cluster.
pub const LABEL_ROLE_CONTROL_PLANE: &str = "omni.sidero.dev/role-controlplane";
/// Marks a worker machine set of a cluster.
pub const LABEL_ROLE_WORKER: &str = "omni.sidero.dev/role-worker";

// --- Annotations (taints, locks, operator knobs) ---

/// Suppresses reconcile writes that would mutate cluster config or membership.
pub const ANNOTATION_LOCKED: &str = "locked";
/// Per-machine variant of `locked`.
pub const ANNOTATION_UPDATE_LOCKED: &str = "update-locked";
/// Suppresses all config mutation on the cluster.
pub const ANNOTATION_BREAK_GLASS: &str = "break-glass";
/// Set while a cluster import is in progress; suppresses the secrets generator.
pub const ANNOTATION_TAINTED_IMPORTING: &str = "tainted-by-importing";
/// Set while a cluster export is in progress.
pub const ANNOTATION_TAINTED_EXPORTING: &str = "tainted-by-exporting";
/// Skips the wipe grace period when tearing a machine's link down.
pub const ANNOTATION_FORCE_DESTROY: &str = "force-destroy";

/// An ordered label map.
///
/// Insertion order is preserved so serialized resources are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(IndexMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates that a non-owner write does not introduce, change, or drop
    /// any label under the reserved system prefix, relative to `current`.
    pub fn validate_user_write(&self, current: Option<&Labels>) -> Result<(), Error> {
        for (key, value) in self.iter() {
            if key.starts_with(SYSTEM_PREFIX) {
                let unchanged = current.and_then(|c| c.get(key)) == Some(value);
                if !unchanged {
                    return Err(Error::InvalidArgument(format!(
                        "label '{key}' uses the reserved prefix '{SYSTEM_PREFIX}'"
                    )));
                }
            }
        }
        if let Some(current) = current {
            for (key, _) in current.iter() {
                if key.starts_with(SYSTEM_PREFIX) && !self.contains(key) {
                    return Err(Error::InvalidArgument(format!(
                        "label '{key}' uses the reserved prefix '{SYSTEM_PREFIX}' and cannot be removed"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Labels(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
