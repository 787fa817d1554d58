// src/core/resource/mod.rs

//! The typed resource model: envelope, metadata, labels, and the closed
//! kind registry. All persistent state in the control plane is a resource.

pub mod kinds;
pub mod labels;
pub mod metadata;
pub mod registry;

pub use kinds::ResourceSpec;
pub use labels::Labels;
pub use metadata::{Metadata, Phase, ResourceKey};
pub use registry::{Kind, Namespace};

use serde::{Deserialize, Serialize};

/// A resource envelope: shared metadata plus a typed spec payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub metadata: Metadata,
    pub spec: ResourceSpec,
}

impl Resource {
    /// Builds a new resource in the spec kind's default namespace.
    pub fn new(id: impl Into<String>, spec: ResourceSpec) -> Self {
        let kind = spec.kind();
        Self {
            metadata: Metadata::new(kind.default_namespace(), kind, id),
            spec,
        }
    }

    /// Builds a new resource in an explicit namespace.
    pub fn new_in(namespace: Namespace, id: impl Into<String>, spec: ResourceSpec) -> Self {
        let kind = spec.kind();
        Self {
            metadata: Metadata::new(namespace, kind, id),
            spec,
        }
    }

    /// Sets the owning controller; used for controller-created resources.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.metadata.owner = Some(owner.into());
        self
    }

    /// Adds a label; used when building controller outputs.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key, value);
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.metadata.key()
    }

    pub fn kind(&self) -> Kind {
        self.metadata.kind
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The declared per-kind search field used by list sorting.
    pub fn search_field(&self) -> Option<String> {
        match &self.spec {
            ResourceSpec::MachineStatus(s) => Some(s.hostname.clone()),
            ResourceSpec::JoinToken(s) => Some(s.name.clone()),
            ResourceSpec::JoinTokenStatus(s) => Some(s.name.clone()),
            ResourceSpec::ClusterMachine(s) => Some(s.cluster.clone()),
            ResourceSpec::MachineSet(s) => Some(s.cluster.clone()),
            ResourceSpec::ExposedService(s) => Some(s.label.clone()),
            _ => None,
        }
    }
}
