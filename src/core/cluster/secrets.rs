// src/core/cluster/secrets.rs

//! Cluster PKI generation and the secret-rotation state machine.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::core::Error;
use crate::core::codec::{MaybeCompressed, compression_config};
use crate::core::resource::kinds::{ClusterMachineSecretsSpec, ClusterSecretsSpec, RotationPhase};
use crate::core::resource::labels::{ANNOTATION_TAINTED_IMPORTING, LABEL_CLUSTER};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::selector::{Selector, Selectors};
use crate::core::store::ListOptions;

pub const NAME: &str = "SecretsController";

/// Generates and owns the long-lived cluster PKI, derives per-machine
/// secret bundles, and advances secret rotation one phase per reconcile
/// (the store offers no multi-resource transaction).
///
/// The import taint suppresses generation: while a cluster is being
/// imported, its secrets come from ImportedClusterSecrets verbatim.
pub struct SecretsController;

#[async_trait]
impl Controller for SecretsController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::Cluster),
                InputSpec::weak(Kind::ImportedClusterSecrets),
                InputSpec::weak(Kind::SecretRotation),
                InputSpec::weak(Kind::ClusterMachine),
            ],
            outputs: vec![Kind::ClusterSecrets, Kind::ClusterMachineSecrets],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let clusters = ctx.list(Namespace::Default, Kind::Cluster, &ListOptions::default())?;

        for secrets in ctx.list(
            Namespace::Default,
            Kind::ClusterSecrets,
            &ListOptions::default(),
        )? {
            if !clusters.iter().any(|c| c.id() == secrets.id()) {
                ctx.teardown_and_destroy(&secrets.key())?;
            }
        }

        for cluster in &clusters {
            ctx.check_cancelled()?;
            if cluster.metadata.is_tearing_down() {
                self.release(ctx, cluster)?;
            } else {
                ctx.add_finalizer(&cluster.key())?;
                self.ensure_secrets(ctx, cluster)?;
                self.advance_rotation(ctx, cluster)?;
                self.derive_machine_secrets(ctx, cluster)?;
            }
        }

        Ok(ReconcileOutcome::Ok)
    }
}

impl SecretsController {
    fn ensure_secrets(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<(), Error> {
        let key = ResourceKey::in_default(Kind::ClusterSecrets, cluster.id());

        if cluster.metadata.has_annotation(ANNOTATION_TAINTED_IMPORTING) {
            // Import in progress: mirror the imported bundle, generate
            // nothing.
            let imported = ctx
                .get_optional(&ResourceKey::in_default(
                    Kind::ImportedClusterSecrets,
                    cluster.id(),
                ))?
                .and_then(|r| r.spec.as_imported_cluster_secrets().cloned());
            if let Some(imported) = imported {
                ctx.ensure(Resource::new(
                    cluster.id(),
                    ResourceSpec::ClusterSecrets(ClusterSecretsSpec {
                        data: imported.data,
                        generation: 1,
                    }),
                ))?;
            }
            return Ok(());
        }

        if ctx.get_optional(&key)?.is_some() {
            return Ok(());
        }

        info!(cluster = cluster.id(), "generating cluster secrets");
        let bundle = generate_secret_bundle(cluster.id(), 1)?;
        ctx.ensure(Resource::new(
            cluster.id(),
            ResourceSpec::ClusterSecrets(ClusterSecretsSpec {
                data: MaybeCompressed::from_uncompressed(&bundle, &compression_config())?,
                generation: 1,
            }),
        ))?;
        Ok(())
    }

    /// Advances the rotation state machine by at most one phase.
    fn advance_rotation(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<(), Error> {
        let rotation_key = ResourceKey::in_default(Kind::SecretRotation, cluster.id());
        let Some(rotation) = ctx.get_optional(&rotation_key)? else {
            return Ok(());
        };
        let Some(rotation_spec) = rotation.spec.as_secret_rotation().cloned() else {
            return Ok(());
        };

        let secrets_key = ResourceKey::in_default(Kind::ClusterSecrets, cluster.id());
        let Some(secrets) = ctx.get_optional(&secrets_key)? else {
            return Ok(());
        };
        let generation = secrets
            .spec
            .as_cluster_secrets()
            .map(|s| s.generation)
            .unwrap_or(0);

        let next_phase = match rotation_spec.phase {
            RotationPhase::Idle if rotation_spec.target_generation > generation => {
                RotationPhase::Preparing
            }
            RotationPhase::Idle => return Ok(()),
            RotationPhase::Preparing => RotationPhase::Rotating,
            RotationPhase::Rotating => {
                // The actual regeneration happens in this step.
                let bundle = generate_secret_bundle(cluster.id(), generation + 1)?;
                let mut next = secrets.clone();
                if let Some(spec) = next.spec.as_cluster_secrets_mut() {
                    spec.data =
                        MaybeCompressed::from_uncompressed(&bundle, &compression_config())?;
                    spec.generation = generation + 1;
                }
                ctx.update(next)?;
                info!(cluster = cluster.id(), generation = generation + 1, "cluster secrets rotated");
                RotationPhase::CleaningUp
            }
            RotationPhase::CleaningUp => RotationPhase::Idle,
        };

        let mut next = rotation;
        if let Some(spec) = next.spec.as_secret_rotation_mut() {
            spec.phase = next_phase;
        }
        ctx.update(next)?;
        Ok(())
    }

    /// Per-machine secret bundles, derived from the cluster bundle.
    fn derive_machine_secrets(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<(), Error> {
        let members = ctx.list(
            Namespace::Default,
            Kind::ClusterMachine,
            &ListOptions::selecting(Selectors::one(Selector::field_eq(
                LABEL_CLUSTER,
                cluster.id(),
            ))),
        )?;

        for existing in ctx.list(
            Namespace::Default,
            Kind::ClusterMachineSecrets,
            &ListOptions::selecting(Selectors::one(Selector::field_eq(
                LABEL_CLUSTER,
                cluster.id(),
            ))),
        )? {
            if !members.iter().any(|m| m.id() == existing.id()) {
                ctx.teardown_and_destroy(&existing.key())?;
            }
        }

        let secrets = ctx
            .get_optional(&ResourceKey::in_default(Kind::ClusterSecrets, cluster.id()))?
            .and_then(|r| r.spec.as_cluster_secrets().cloned());
        let Some(secrets) = secrets else {
            return Ok(());
        };

        for member in &members {
            if member.metadata.is_tearing_down() {
                continue;
            }
            let token = machine_token(cluster.id(), member.id(), secrets.generation);
            let bundle = serde_yaml::to_string(&json!({
                "machineToken": token,
                "generation": secrets.generation,
            }))?;
            ctx.ensure(
                Resource::new(
                    member.id(),
                    ResourceSpec::ClusterMachineSecrets(ClusterMachineSecretsSpec {
                        data: MaybeCompressed::from_uncompressed(
                            bundle.as_bytes(),
                            &compression_config(),
                        )?,
                    }),
                )
                .with_label(LABEL_CLUSTER, cluster.id()),
            )?;
        }
        Ok(())
    }

    /// Teardown path: drop the cluster's secret material, then release the
    /// finalizer that was guarding it.
    fn release(&self, ctx: &ControllerContext, cluster: &Resource) -> Result<(), Error> {
        if !cluster.metadata.finalizers.contains(ctx.name()) {
            return Ok(());
        }
        let secrets_key = ResourceKey::in_default(Kind::ClusterSecrets, cluster.id());
        let secrets_gone = ctx.teardown_and_destroy(&secrets_key)?;

        let mut machine_secrets_gone = true;
        for existing in ctx.list(
            Namespace::Default,
            Kind::ClusterMachineSecrets,
            &ListOptions::selecting(Selectors::one(Selector::field_eq(
                LABEL_CLUSTER,
                cluster.id(),
            ))),
        )? {
            machine_secrets_gone &= ctx.teardown_and_destroy(&existing.key())?;
        }

        if secrets_gone && machine_secrets_gone {
            ctx.remove_finalizer(&cluster.key())?;
        } else {
            warn!(cluster = cluster.id(), "waiting for secret material to drain");
        }
        Ok(())
    }
}

/// A deterministic-shape, random-content PKI bundle.
fn generate_secret_bundle(cluster_id: &str, generation: u64) -> Result<Vec<u8>, Error> {
    let mut ca = [0u8; 32];
    let mut bootstrap = [0u8; 16];
    let mut secretbox = [0u8; 32];
    getrandom::fill(&mut ca).map_err(|e| Error::Internal(e.to_string()))?;
    getrandom::fill(&mut bootstrap).map_err(|e| Error::Internal(e.to_string()))?;
    getrandom::fill(&mut secretbox).map_err(|e| Error::Internal(e.to_string()))?;

    let bundle = serde_yaml::to_string(&json!({
        "clusterId": cluster_id,
        "generation": generation,
        "ca": { "crt": hex::encode(ca), "key": hex::encode(&ca[..16]) },
        "bootstraptoken": hex::encode(bootstrap),
        "secretboxEncryptionSecret": hex::encode(secretbox),
    }))?;
    Ok(bundle.into_bytes())
}

/// A keyed per-machine token so member bundles differ without storing more
/// state.
fn machine_token(cluster_id: &str, machine_id: &str, generation: u64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(cluster_id.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(machine_id.as_bytes());
    mac.update(&generation.to_le_bytes());
    hex::encode(&mac.finalize().into_bytes()[..16])
}
