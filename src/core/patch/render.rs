// src/core/patch/render.rs

//! Rendering a cluster machine's config: base config generation, ordered
//! patch application, validation, hashing, and redaction.

use bytes::Bytes;
use serde_json::json;
use serde_yaml::Value;
use sha2::{Digest, Sha256};

use super::merge::{redact, strategic_merge};
use super::weight_of;
use crate::core::Error;
use crate::core::ports::TalosConfigLoader;
use crate::core::resource::kinds::{ClusterSpec, MachineSetRole};

/// One patch selected for a machine, in store order.
#[derive(Debug, Clone)]
pub struct PatchRef {
    pub id: String,
    pub data: Bytes,
}

/// Everything the renderer needs for one machine.
pub struct RenderInput<'a> {
    pub cluster_id: &'a str,
    pub cluster: &'a ClusterSpec,
    pub machine_id: &'a str,
    pub machine_set_id: &'a str,
    pub role: MachineSetRole,
    /// The cluster PKI bundle, merged under `cluster.secrets`.
    pub secrets: Option<&'a [u8]>,
    pub join_token: &'a str,
    pub api_url: &'a str,
    pub patches: Vec<PatchRef>,
}

/// The rendered result; `data` and `redacted` are uncompressed views, the
/// caller applies the storage compression policy.
#[derive(Debug, Clone)]
pub struct RenderedConfig {
    pub data: Bytes,
    pub redacted: Bytes,
    pub hash: String,
}

/// Renders the machine config: base, then every matching patch in
/// ascending (weight, id) order, validating through the Talos config
/// loader after each step so a failure is bound to the offending patch.
/// Repeated renders with unchanged inputs are byte-identical.
pub fn render(
    input: &RenderInput<'_>,
    loader: &dyn TalosConfigLoader,
) -> Result<RenderedConfig, Error> {
    let mut config = base_config(input)?;

    let mut patches: Vec<(u32, &PatchRef)> = Vec::with_capacity(input.patches.len());
    for patch in &input.patches {
        // Empty and whitespace-only patches are dropped before merging.
        if patch.data.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        patches.push((weight_of(&patch.id)?, patch));
    }
    patches.sort_by(|(wa, a), (wb, b)| wa.cmp(wb).then_with(|| a.id.cmp(&b.id)));

    for (_, patch) in patches {
        let fragment: Value =
            serde_yaml::from_slice(&patch.data).map_err(|e| Error::InvalidConfig {
                patch_id: patch.id.clone(),
                reason: format!("patch does not parse: {e}"),
            })?;
        strategic_merge(&mut config, fragment);

        let serialized = serde_yaml::to_string(&config)?;
        loader
            .validate(serialized.as_bytes())
            .map_err(|e| Error::InvalidConfig {
                patch_id: patch.id.clone(),
                reason: e.to_string(),
            })?;
    }

    let data = serde_yaml::to_string(&config)?;
    let redacted = serde_yaml::to_string(&redact(&config))?;
    let hash = hex::encode(Sha256::digest(data.as_bytes()));

    Ok(RenderedConfig {
        data: Bytes::from(data),
        redacted: Bytes::from(redacted),
        hash,
    })
}

/// The generated base config a machine's patches merge over, produced from
/// the cluster's versions, secrets, and the join artifacts.
fn base_config(input: &RenderInput<'_>) -> Result<Value, Error> {
    let machine_type = match input.role {
        MachineSetRole::ControlPlane => "controlplane",
        MachineSetRole::Worker => "worker",
    };

    let mut config = serde_yaml::to_value(json!({
        "version": "v1alpha1",
        "machine": {
            "type": machine_type,
            "token": input.join_token,
            "network": {
                "hostname": input.machine_id,
            },
            "kubelet": {
                "image": format!("ghcr.io/siderolabs/kubelet:v{}", input.cluster.kubernetes_version),
            },
            "siderolink": {
                "api": input.api_url,
            },
        },
        "cluster": {
            "clusterName": input.cluster_id,
            "controlPlane": {
                "endpoint": input.api_url,
            },
        },
    }))?;

    if let Some(secrets) = input.secrets {
        let secrets: Value = serde_yaml::from_slice(secrets)
            .map_err(|e| Error::InvalidFormat(format!("cluster secrets do not parse: {e}")))?;
        if let Value::Mapping(map) = &mut config {
            if let Some(Value::Mapping(cluster)) = map.get_mut("cluster") {
                cluster.insert(Value::String("secrets".to_string()), secrets);
            }
        }
    }

    Ok(config)
}
