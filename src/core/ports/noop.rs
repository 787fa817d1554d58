// src/core/ports/noop.rs

//! Static in-memory port implementations.
//!
//! These back offline operation and the integration tests: the Talos port
//! records applied configs and serves a settable etcd state, the image
//! factory hashes schematics without an upstream, and the backup store
//! keeps snapshots in a map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    ApplyReport, BackupInfo, BackupStore, EtcdMember, EtcdStatus, Identity, ImageFactory,
    KubernetesApplier, Role, Schematic, Subject, TalosClient, TalosConfigLoader,
};
use crate::core::Error;

/// Computes schematic ids locally; behaves like an image factory that
/// already knows every schematic.
#[derive(Debug, Default)]
pub struct HashingImageFactory;

#[async_trait]
impl ImageFactory for HashingImageFactory {
    async fn ensure_schematic(&self, schematic: &Schematic) -> Result<String, Error> {
        schematic.content_hash()
    }
}

#[derive(Debug, Default)]
struct TalosState {
    /// machine id -> sha256 hex of the last applied config.
    applied: HashMap<String, String>,
    /// cluster id -> etcd state.
    etcd: HashMap<String, EtcdStatus>,
    bootstrapped: Vec<String>,
    reset: Vec<String>,
    /// When set, apply_configuration fails for the named machine.
    failing_machines: Vec<String>,
}

/// A Talos port with settable observed state, used offline and in tests.
#[derive(Debug, Default)]
pub struct StaticTalos {
    state: Mutex<TalosState>,
}

impl StaticTalos {
    /// Marks a cluster's etcd healthy with the given member hostnames.
    pub fn set_etcd_healthy(&self, cluster: &str, members: &[&str]) {
        let members = members
            .iter()
            .enumerate()
            .map(|(i, hostname)| EtcdMember {
                id: i as u64 + 1,
                hostname: (*hostname).to_string(),
            })
            .collect();
        self.state.lock().etcd.insert(
            cluster.to_string(),
            EtcdStatus {
                healthy: true,
                members,
            },
        );
    }

    /// Makes config application fail for a machine, to drive rollout-failure
    /// scenarios.
    pub fn fail_apply_on(&self, machine: &str) {
        self.state.lock().failing_machines.push(machine.to_string());
    }

    pub fn clear_apply_failure(&self, machine: &str) {
        self.state.lock().failing_machines.retain(|m| m != machine);
    }

    /// The sha256 of the last config applied to a machine.
    pub fn applied_config_hash(&self, machine: &str) -> Option<String> {
        self.state.lock().applied.get(machine).cloned()
    }

    pub fn was_bootstrapped(&self, machine: &str) -> bool {
        self.state.lock().bootstrapped.iter().any(|m| m == machine)
    }

    pub fn was_reset(&self, machine: &str) -> bool {
        self.state.lock().reset.iter().any(|m| m == machine)
    }
}

#[async_trait]
impl TalosClient for StaticTalos {
    async fn apply_configuration(&self, machine: &str, config: &[u8]) -> Result<(), Error> {
        use sha2::{Digest, Sha256};
        let mut state = self.state.lock();
        if state.failing_machines.iter().any(|m| m == machine) {
            return Err(Error::Unavailable(format!(
                "config apply failed on machine '{machine}'"
            )));
        }
        state
            .applied
            .insert(machine.to_string(), hex::encode(Sha256::digest(config)));
        Ok(())
    }

    async fn bootstrap_etcd(&self, machine: &str) -> Result<(), Error> {
        self.state.lock().bootstrapped.push(machine.to_string());
        Ok(())
    }

    async fn etcd_status(&self, cluster: &str) -> Result<EtcdStatus, Error> {
        Ok(self
            .state
            .lock()
            .etcd
            .get(cluster)
            .cloned()
            .unwrap_or_default())
    }

    async fn reset_machine(&self, machine: &str) -> Result<(), Error> {
        self.state.lock().reset.push(machine.to_string());
        Ok(())
    }
}

/// Validates rendered configs by parsing them as YAML documents.
#[derive(Debug, Default)]
pub struct YamlConfigLoader;

impl TalosConfigLoader for YamlConfigLoader {
    fn validate(&self, config: &[u8]) -> Result<(), Error> {
        serde_yaml::from_slice::<serde_yaml::Value>(config)
            .map(|_| ())
            .map_err(|e| Error::InvalidFormat(format!("config does not parse: {e}")))
    }
}

/// Records manifest applies without a live cluster.
#[derive(Debug, Default)]
pub struct RecordingKubernetes {
    applies: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl KubernetesApplier for RecordingKubernetes {
    async fn apply(&self, cluster: &str, manifests: &[u8]) -> Result<ApplyReport, Error> {
        self.applies
            .lock()
            .push((cluster.to_string(), manifests.len()));
        Ok(ApplyReport {
            applied: 1,
            drifted: Vec::new(),
        })
    }
}

/// Keeps backups in memory.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    backups: Mutex<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn put(&self, cluster: &str, id: &str, data: &[u8]) -> Result<(), Error> {
        self.backups
            .lock()
            .insert((cluster.to_string(), id.to_string()), data.to_vec());
        Ok(())
    }

    async fn list(&self, cluster: &str) -> Result<Vec<BackupInfo>, Error> {
        Ok(self
            .backups
            .lock()
            .iter()
            .filter(|((c, _), _)| c == cluster)
            .map(|((c, id), data)| BackupInfo {
                id: id.clone(),
                cluster: c.clone(),
                created: Some(Utc::now()),
                size_bytes: data.len() as u64,
            })
            .collect())
    }

    async fn get(&self, cluster: &str, id: &str) -> Result<Vec<u8>, Error> {
        self.backups
            .lock()
            .get(&(cluster.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("backup '{id}' for cluster '{cluster}'")))
    }
}

/// Resolves every subject to an admin; auth providers are out of scope.
#[derive(Debug, Default)]
pub struct StaticIdentity;

#[async_trait]
impl Identity for StaticIdentity {
    async fn resolve(&self, subject: &str) -> Result<Subject, Error> {
        Ok(Subject {
            id: subject.to_string(),
            role: Role::Admin,
        })
    }
}
