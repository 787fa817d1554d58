// src/core/resource/kinds/infra.rs

//! The contract with infrastructure providers: acceptance, power intent,
//! the wipe protocol, and provisioning requests.

use serde::{Deserialize, Serialize};

/// User decision on an infrastructure-provider-discovered machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptanceStatus {
    /// Tunneled but not selectable by any machine set.
    #[default]
    Pending,
    Accepted,
    /// No further allocation; an already-allocated machine is not torn down.
    Rejected,
}

/// Power-state intent for a provider-managed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    #[default]
    PoweredOn,
    PoweredOff,
}

/// User intent for a provider-managed machine; unowned, written through the
/// external API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraMachineConfigSpec {
    pub acceptance: AcceptanceStatus,
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub extra_kernel_args: String,
}

/// Controller-owned projection of a machine toward its provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraMachineSpec {
    pub provider: String,
    pub acceptance: AcceptanceStatus,
    #[serde(default)]
    pub power_state: PowerState,
    /// Rotated to a fresh random value each time the machine leaves a
    /// cluster; the provider wipes the disk when it observes a new value.
    #[serde(default)]
    pub wipe_id: String,
    /// Running install counter; compared against the provider-recorded
    /// value at last wipe to infer install state.
    #[serde(default)]
    pub install_event_id: u64,
    #[serde(default)]
    pub node_unique_token: String,
}

/// A provisioning request toward a provider; the provider records its wipe
/// acknowledgements here (the resource is unowned so the provider role can
/// write it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineRequestSpec {
    pub provider: String,
    #[serde(default)]
    pub talos_version: String,
    /// The wipe id the provider most recently completed.
    #[serde(default)]
    pub acknowledged_wipe_id: String,
    /// The core's install-event counter at the time of the last wipe.
    /// Comparisons accept only increases.
    #[serde(default)]
    pub install_event_id_at_last_wipe: u64,
}
