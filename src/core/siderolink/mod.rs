// src/core/siderolink/mod.rs

//! The machine-join subsystem: join tokens, overlay-tunnel peers, the
//! infrastructure-provider acceptance gate, and join artifact rendering.

pub mod infra;
pub mod machines;
pub mod tokens;

pub use infra::InfraMachineController;
pub use machines::MachineController;
pub use tokens::JoinTokenStatusController;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::Error;
use crate::core::resource::kinds::SiderolinkApiConfigSpec;

/// The singleton id of the DefaultJoinToken pointer.
pub const DEFAULT_JOIN_TOKEN_ID: &str = "default";

/// The singleton id of the advertised join endpoint configuration.
pub const SIDEROLINK_API_CONFIG_ID: &str = "current";

/// Domain-separation key for token fingerprints.
const FINGERPRINT_KEY: &[u8] = b"omnid-join-token-v1";

/// Generates a fresh token secret: 24 random bytes, hex-encoded.
pub fn generate_token() -> Result<String, Error> {
    let mut raw = [0u8; 24];
    getrandom::fill(&mut raw).map_err(|e| Error::Internal(e.to_string()))?;
    Ok(hex::encode(raw))
}

/// The stable, non-secret id of a token: a keyed fingerprint of its value.
pub fn token_fingerprint(token: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(FINGERPRINT_KEY).expect("hmac accepts any key length");
    mac.update(token.as_bytes());
    hex::encode(&mac.finalize().into_bytes()[..16])
}

/// Renders the kernel-args string a machine boots with to join the tunnel.
pub fn kernel_args(
    config: &SiderolinkApiConfigSpec,
    join_token: &str,
    node_unique_token: Option<&str>,
) -> String {
    let mut api = format!(
        "siderolink.api={}?jointoken={}",
        config.api_url, join_token
    );
    if config.use_grpc_tunnel {
        api.push_str("&grpc_tunnel=true");
    }
    if let Some(unique) = node_unique_token {
        api.push_str("&nodeuniquetoken=");
        api.push_str(unique);
    }
    format!(
        "{api} talos.events.sink=[fdae:41e4:649b:9303::1]:{} talos.logging.kernel=tcp://[fdae:41e4:649b:9303::1]:{}",
        config.events_port, config.logs_port
    )
}

/// Renders the machine-config join document handed out by `gen-join-config`.
pub fn join_config_document(config: &SiderolinkApiConfigSpec, join_token: &str) -> String {
    let mut api_url = format!("{}?jointoken={}", config.api_url, join_token);
    if config.use_grpc_tunnel {
        api_url.push_str("&grpc_tunnel=true");
    }
    format!(
        "apiVersion: v1alpha1\n\
         kind: SideroLinkConfig\n\
         apiUrl: {api_url}\n\
         ---\n\
         apiVersion: v1alpha1\n\
         kind: EventSinkConfig\n\
         endpoint: '[fdae:41e4:649b:9303::1]:{}'\n\
         ---\n\
         apiVersion: v1alpha1\n\
         kind: KmsgLogConfig\n\
         name: omnid-kmsg\n\
         url: 'tcp://[fdae:41e4:649b:9303::1]:{}'\n",
        config.events_port, config.logs_port
    )
}
