// src/core/resource/kinds/config_patch.rs

//! Config-patch spec: a labeled YAML fragment with a weight encoded in its
//! id prefix (`NNN-*`).

use serde::{Deserialize, Serialize};

use crate::core::codec::MaybeCompressed;

/// A layered YAML fragment merged into the rendered machine config.
/// Targeting (cluster, machine-set, cluster-machine, machine) is carried by
/// labels; ordering by the weight prefix of the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatchSpec {
    pub data: MaybeCompressed,
}
