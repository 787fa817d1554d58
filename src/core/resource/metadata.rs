// src/core/resource/metadata.rs

//! Shared resource metadata: identity, version, phase, ownership, finalizers.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::labels::Labels;
use super::registry::{Kind, Namespace};

/// The unique key of a resource: `(namespace, kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: Namespace,
    pub kind: Kind,
    pub id: String,
}

impl ResourceKey {
    pub fn new(namespace: Namespace, kind: Kind, id: impl Into<String>) -> Self {
        Self {
            namespace,
            kind,
            id: id.into(),
        }
    }

    /// Builds a key in the kind's default namespace.
    pub fn in_default(kind: Kind, id: impl Into<String>) -> Self {
        Self::new(kind.default_namespace(), kind, id)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// The lifecycle phase of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Running,
    TearingDown,
}

/// Metadata shared by every resource envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub namespace: Namespace,
    pub kind: Kind,
    pub id: String,
    /// Monotonic per-resource version; every accepted mutation produces
    /// exactly one new version.
    pub version: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// The single controller allowed to mutate spec, labels, and
    /// annotations once set. Immutable after creation.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: IndexMap<String, String>,
    /// Ordered set of finalizer names; destruction waits for all of them.
    #[serde(default)]
    pub finalizers: IndexSet<String>,
    #[serde(default)]
    pub phase: Phase,
}

impl Metadata {
    /// Fresh metadata for a new resource; the store assigns version and
    /// timestamps on create.
    pub fn new(namespace: Namespace, kind: Kind, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            namespace,
            kind,
            id: id.into(),
            version: 0,
            created: now,
            updated: now,
            owner: None,
            labels: Labels::new(),
            annotations: IndexMap::new(),
            finalizers: IndexSet::new(),
            phase: Phase::Running,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace, self.kind, self.id.clone())
    }

    pub fn is_tearing_down(&self) -> bool {
        self.phase == Phase::TearingDown
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }
}
