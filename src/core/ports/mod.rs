// src/core/ports/mod.rs

//! External ports: the narrow interfaces the core calls out through.
//!
//! No implementation belongs to the core. The `noop` module provides
//! static in-memory implementations used in offline mode and by tests.

pub mod noop;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Error;

/// A content-addressed description of a Talos installer image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematic {
    pub extensions: Vec<String>,
    pub extra_kernel_args: Vec<String>,
}

impl Schematic {
    /// The schematic id is the sha256 of its canonical JSON encoding.
    pub fn content_hash(&self) -> Result<String, Error> {
        use sha2::{Digest, Sha256};
        let encoded = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

/// The image-factory port.
#[async_trait]
pub trait ImageFactory: Send + Sync {
    /// Idempotently registers a schematic; the returned id must equal the
    /// schematic's content hash, anything else is an error.
    async fn ensure_schematic(&self, schematic: &Schematic) -> Result<String, Error>;
}

/// One etcd member as reported by Talos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdMember {
    pub id: u64,
    pub hostname: String,
}

/// Observed etcd state for a cluster's control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdStatus {
    pub healthy: bool,
    pub members: Vec<EtcdMember>,
}

/// The Talos apid port: config application, etcd observation, and machine
/// resets.
#[async_trait]
pub trait TalosClient: Send + Sync {
    async fn apply_configuration(&self, machine: &str, config: &[u8]) -> Result<(), Error>;

    async fn bootstrap_etcd(&self, machine: &str) -> Result<(), Error>;

    async fn etcd_status(&self, cluster: &str) -> Result<EtcdStatus, Error>;

    /// Asks the machine to leave etcd and wipe its ephemeral state.
    async fn reset_machine(&self, machine: &str) -> Result<(), Error>;
}

/// Round-trip validation of a rendered machine config through the Talos
/// config loader.
pub trait TalosConfigLoader: Send + Sync {
    fn validate(&self, config: &[u8]) -> Result<(), Error>;
}

/// Result of an idempotent manifest apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: u32,
    /// Manifests whose live state differed from the desired state.
    pub drifted: Vec<String>,
}

/// The Kubernetes manifest-applier port.
#[async_trait]
pub trait KubernetesApplier: Send + Sync {
    async fn apply(&self, cluster: &str, manifests: &[u8]) -> Result<ApplyReport, Error>;
}

/// Metadata of one stored etcd snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub cluster: String,
    pub created: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// The encrypted etcd snapshot store.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn put(&self, cluster: &str, id: &str, data: &[u8]) -> Result<(), Error>;

    async fn list(&self, cluster: &str) -> Result<Vec<BackupInfo>, Error>;

    async fn get(&self, cluster: &str, id: &str) -> Result<Vec<u8>, Error>;
}

/// Roles attached to resolved subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    None,
    Reader,
    Operator,
    Admin,
    InfraProvider,
}

/// A resolved identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub role: Role,
}

/// Subject resolution for ACL evaluation.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn resolve(&self, subject: &str) -> Result<Subject, Error>;
}

/// The full set of external ports handed to the controllers.
#[derive(Clone)]
pub struct Ports {
    pub image_factory: Arc<dyn ImageFactory>,
    pub talos: Arc<dyn TalosClient>,
    pub config_loader: Arc<dyn TalosConfigLoader>,
    pub kubernetes: Arc<dyn KubernetesApplier>,
    pub backup: Arc<dyn BackupStore>,
    pub identity: Arc<dyn Identity>,
}

impl Ports {
    /// Static in-memory ports for offline operation and tests.
    pub fn offline() -> Self {
        Self {
            image_factory: Arc::new(noop::HashingImageFactory::default()),
            talos: Arc::new(noop::StaticTalos::default()),
            config_loader: Arc::new(noop::YamlConfigLoader),
            kubernetes: Arc::new(noop::RecordingKubernetes::default()),
            backup: Arc::new(noop::MemoryBackupStore::default()),
            identity: Arc::new(noop::StaticIdentity::default()),
        }
    }
}
