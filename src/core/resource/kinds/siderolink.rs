// src/core/resource/kinds/siderolink.rs

//! SideroLink specs: overlay-tunnel peers, join tokens, and the advertised
//! join endpoint configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a node has durably persisted its unique token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeUniqueTokenStatus {
    #[default]
    Unknown,
    /// The token is stored in the node's META partition.
    Persistent,
    /// The token is held in memory only.
    Ephemeral,
    /// The node reported no token.
    None,
    /// The node's Talos version cannot persist tokens.
    Unsupported,
}

/// An overlay-tunnel peer record. The resource id is the machine id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// The /64 subnet assigned to the node inside the tunnel.
    pub node_subnet: String,
    /// The peer's WireGuard public key.
    pub public_key: String,
    #[serde(default)]
    pub last_endpoint: String,
    /// Remote address taken from the forwarded-for header at registration.
    #[serde(default)]
    pub remote_addr: String,
    #[serde(default)]
    pub virtual_addr: String,
    /// Per-node secret stored in the node's META partition at join time;
    /// authenticates reconnects from the same hardware.
    #[serde(default)]
    pub node_unique_token: String,
    #[serde(default)]
    pub node_unique_token_status: NodeUniqueTokenStatus,
    pub connected: bool,
}

/// A time-bounded secret authorizing machines to register links.
/// The resource id is the token value's fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinTokenSpec {
    pub name: String,
    /// The raw token secret handed to machines.
    pub token: String,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

/// Derived lifecycle state of a join token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinTokenState {
    #[default]
    Active,
    Revoked,
    Expired,
}

/// Derived join-token status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinTokenStatusSpec {
    pub state: JoinTokenState,
    pub use_count: u64,
    pub is_default: bool,
    pub name: String,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

/// Binds a link to the join token it registered with.
/// The resource id is the link id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinTokenUsageSpec {
    pub token_id: String,
}

/// Singleton pointer to the token used when none is specified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultJoinTokenSpec {
    pub token_id: String,
}

/// Singleton advertised join endpoint configuration; join artifacts are
/// rendered from this plus the active token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiderolinkApiConfigSpec {
    /// The advertised API URL machines dial, e.g. "https://omni.example:8090".
    pub api_url: String,
    pub events_port: u16,
    pub logs_port: u16,
    #[serde(default)]
    pub use_grpc_tunnel: bool,
}
