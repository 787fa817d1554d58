// src/core/resource/kinds/machine.rs

//! Machine specs: link-layer identity and the observed machine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A machine known to the control plane. Created when a link registers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Set when the machine is managed by an infrastructure provider.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// The siderolink address the machine's apid is reachable on.
    #[serde(default)]
    pub management_address: String,
}

/// A single hardware disk snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub device: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub model: String,
}

/// Observed machine state: connectivity, hardware, and network snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatusSpec {
    pub connected: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub talos_version: String,
    #[serde(default)]
    pub schematic_id: String,
    /// The machine's schematic could not be resolved by the image factory.
    /// Such machines stay eligible to preserve old installations; the flag
    /// is surfaced here so operators can observe it.
    #[serde(default)]
    pub schematic_invalid: bool,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub disks: Vec<Disk>,
}

/// Point-in-time Talos stage report used by update orchestration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatusSnapshotSpec {
    /// Talos machine stage, e.g. "running", "booting", "resetting".
    pub stage: String,
    pub ready: bool,
}

/// Siderolink byte counters for a machine's tunnel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatusLinkSpec {
    pub link_id: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}
