// src/core/resource/kinds/secrets.rs

//! Cluster PKI specs and the secret-rotation state machine.

use serde::{Deserialize, Serialize};

use crate::core::codec::MaybeCompressed;

/// Long-lived cluster PKI bundle, generated once per cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSecretsSpec {
    pub data: MaybeCompressed,
    /// Bumped by each completed rotation.
    #[serde(default)]
    pub generation: u64,
}

/// Secrets brought in by a cluster import; present only while the
/// import taint is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportedClusterSecretsSpec {
    pub data: MaybeCompressed,
}

/// Phases of the secret-rotation state machine. The store offers no
/// multi-resource transaction, so rotation advances one phase per reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPhase {
    #[default]
    Idle,
    Preparing,
    Rotating,
    CleaningUp,
}

/// Rotation progress for a cluster's secrets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRotationSpec {
    pub phase: RotationPhase,
    pub target_generation: u64,
}
