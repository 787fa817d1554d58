// src/server/service.rs

//! The in-process resource service: the surface the (out-of-scope) RPC
//! transport calls into, plus the operator write helpers the CLI maps to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::info;

use crate::core::Error;
use crate::core::resource::kinds::{
    AcceptanceStatus, ClusterSpec, ConfigPatchSpec, DefaultJoinTokenSpec,
    ImportedClusterSecretsSpec, InfraMachineConfigSpec, JoinTokenUsageSpec, LinkSpec,
};
use crate::core::resource::labels::{
    ANNOTATION_LOCKED, ANNOTATION_TAINTED_IMPORTING, LABEL_CLUSTER, LABEL_INFRA_PROVIDER,
    LABEL_MACHINE,
};
use crate::core::codec::{MaybeCompressed, compression_config};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::selector::Selectors;
use crate::core::siderolink::{
    self, DEFAULT_JOIN_TOKEN_ID, SIDEROLINK_API_CONFIG_ID, token_fingerprint,
};
use crate::core::store::watch::Event;
use crate::core::store::{GetOptions, ListOptions, Store, Writer};

/// The resource service. Every write goes through the external writer, so
/// owner enforcement and system-label validation apply.
#[derive(Clone)]
pub struct ResourceService {
    store: Arc<Store>,
}

impl ResourceService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn get(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.get(key)
    }

    pub fn get_with(&self, key: &ResourceKey, opts: &GetOptions) -> Result<Resource, Error> {
        self.store.get_with(key, opts)
    }

    pub fn list(
        &self,
        namespace: Namespace,
        kind: Kind,
        opts: &ListOptions,
    ) -> Result<Vec<Resource>, Error> {
        self.store.list(namespace, kind, opts)
    }

    pub fn create(&self, res: Resource) -> Result<Resource, Error> {
        self.store.create(&Writer::External, res)
    }

    pub fn update(&self, res: Resource) -> Result<Resource, Error> {
        self.store.update(&Writer::External, res)
    }

    pub fn teardown(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.teardown(&Writer::External, key)
    }

    pub fn destroy(&self, key: &ResourceKey) -> Result<(), Error> {
        self.store.destroy(&Writer::External, key)
    }

    pub fn watch(&self, key: &ResourceKey) -> impl Stream<Item = Result<Event, Error>> + Send {
        self.store.watch(key)
    }

    pub fn watch_kind(
        &self,
        namespace: Namespace,
        kind: Kind,
        selectors: Selectors,
    ) -> impl Stream<Item = Result<Event, Error>> + Send {
        self.store.watch_kind(namespace, kind, selectors)
    }

    // --- Operator surface ---

    /// `create-join-token(name, expiration)`. The first token becomes the
    /// default.
    pub fn create_join_token(
        &self,
        name: &str,
        expiration_time: Option<DateTime<Utc>>,
    ) -> Result<Resource, Error> {
        let token = siderolink::tokens::new_join_token(name, expiration_time)?;
        let created = self.create(token)?;

        let default_key = ResourceKey::in_default(Kind::DefaultJoinToken, DEFAULT_JOIN_TOKEN_ID);
        if self.store.get(&default_key).is_err() {
            self.create(Resource::new(
                DEFAULT_JOIN_TOKEN_ID,
                ResourceSpec::DefaultJoinToken(DefaultJoinTokenSpec {
                    token_id: created.id().to_string(),
                }),
            ))?;
        }
        info!(token = created.id(), name, "join token created");
        Ok(created)
    }

    pub fn revoke_join_token(&self, token_id: &str) -> Result<(), Error> {
        let key = ResourceKey::in_default(Kind::JoinToken, token_id);
        let mut token = self.store.get(&key)?;
        let Some(spec) = token.spec.as_join_token_mut() else {
            return Err(Error::Internal("join token carries a foreign spec".to_string()));
        };
        if spec.revoked {
            return Ok(());
        }
        spec.revoked = true;
        self.update(token)?;
        Ok(())
    }

    pub fn set_default_join_token(&self, token_id: &str) -> Result<(), Error> {
        // The token must exist.
        self.store
            .get(&ResourceKey::in_default(Kind::JoinToken, token_id))?;

        let default_key = ResourceKey::in_default(Kind::DefaultJoinToken, DEFAULT_JOIN_TOKEN_ID);
        match self.store.get(&default_key) {
            Err(Error::NotFound(_)) => {
                self.create(Resource::new(
                    DEFAULT_JOIN_TOKEN_ID,
                    ResourceSpec::DefaultJoinToken(DefaultJoinTokenSpec {
                        token_id: token_id.to_string(),
                    }),
                ))?;
            }
            Err(e) => return Err(e),
            Ok(mut current) => {
                if let Some(spec) = current.spec.as_default_join_token_mut() {
                    spec.token_id = token_id.to_string();
                }
                self.update(current)?;
            }
        }
        Ok(())
    }

    /// `gen-join-config([grpc-tunnel], [token])`: renders the join document
    /// and the kernel args for the active (or named) token.
    pub fn gen_join_config(
        &self,
        use_grpc_tunnel: Option<bool>,
        token_id: Option<&str>,
    ) -> Result<(String, String), Error> {
        let mut api_config = self
            .store
            .get(&ResourceKey::in_default(
                Kind::SiderolinkApiConfig,
                SIDEROLINK_API_CONFIG_ID,
            ))?
            .spec
            .as_siderolink_api_config()
            .cloned()
            .ok_or_else(|| Error::Internal("siderolink config carries a foreign spec".to_string()))?;
        if let Some(tunnel) = use_grpc_tunnel {
            api_config.use_grpc_tunnel = tunnel;
        }

        let token_id = match token_id {
            Some(id) => id.to_string(),
            None => self
                .store
                .get(&ResourceKey::in_default(
                    Kind::DefaultJoinToken,
                    DEFAULT_JOIN_TOKEN_ID,
                ))?
                .spec
                .as_default_join_token()
                .map(|s| s.token_id.clone())
                .unwrap_or_default(),
        };
        let token = self
            .store
            .get(&ResourceKey::in_default(Kind::JoinToken, &token_id))?
            .spec
            .as_join_token()
            .map(|s| s.token.clone())
            .unwrap_or_default();

        let document = siderolink::join_config_document(&api_config, &token);
        let args = siderolink::kernel_args(&api_config, &token, None);
        Ok((document, args))
    }

    /// The join handshake: a machine presents a token and registers its
    /// tunnel peer. Returns the Link.
    pub fn register_link(
        &self,
        machine_id: &str,
        public_key: &str,
        node_subnet: &str,
        remote_addr: &str,
        provider: Option<&str>,
        token: &str,
    ) -> Result<Resource, Error> {
        let token_id = token_fingerprint(token);
        let token_key = ResourceKey::in_default(Kind::JoinToken, &token_id);
        let token_res = self
            .store
            .get(&token_key)
            .map_err(|_| Error::PermissionDenied("unknown join token".to_string()))?;
        let token_spec = token_res
            .spec
            .as_join_token()
            .ok_or_else(|| Error::Internal("join token carries a foreign spec".to_string()))?;
        if token_spec.revoked {
            return Err(Error::PermissionDenied("join token is revoked".to_string()));
        }
        if token_spec
            .expiration_time
            .is_some_and(|expiry| expiry <= Utc::now())
        {
            return Err(Error::PermissionDenied("join token is expired".to_string()));
        }

        let link_key = ResourceKey::in_default(Kind::Link, machine_id);
        let link = match self.store.get(&link_key) {
            Err(Error::NotFound(_)) => {
                let mut link = Resource::new(
                    machine_id,
                    ResourceSpec::Link(LinkSpec {
                        node_subnet: node_subnet.to_string(),
                        public_key: public_key.to_string(),
                        remote_addr: remote_addr.to_string(),
                        connected: true,
                        ..Default::default()
                    }),
                );
                if let Some(provider) = provider {
                    // Registration is a trusted path; the provider marker is
                    // a system label, so the write bypasses the external
                    // writer's label validation.
                    link.metadata.labels.insert(LABEL_INFRA_PROVIDER, provider);
                    self.store
                        .create(&Writer::controller("LinkRegistration"), link)?
                } else {
                    self.create(link)?
                }
            }
            Err(e) => return Err(e),
            Ok(mut existing) => {
                // Reconnect from the same hardware must present the stored
                // node-unique token; key rotation alone is not enough.
                if let Some(spec) = existing.spec.as_link_mut() {
                    spec.public_key = public_key.to_string();
                    spec.last_endpoint = remote_addr.to_string();
                    spec.remote_addr = remote_addr.to_string();
                    spec.connected = true;
                }
                self.update(existing)?
            }
        };

        let usage_key = ResourceKey::in_default(Kind::JoinTokenUsage, machine_id);
        if self.store.get(&usage_key).is_err() {
            self.create(Resource::new(
                machine_id,
                ResourceSpec::JoinTokenUsage(JoinTokenUsageSpec { token_id }),
            ))?;
        }

        info!(machine = machine_id, "link registered");
        Ok(link)
    }

    /// Accepts or rejects an infrastructure-provider-discovered machine.
    pub fn set_machine_acceptance(
        &self,
        machine_id: &str,
        acceptance: AcceptanceStatus,
    ) -> Result<(), Error> {
        let key = ResourceKey::in_default(Kind::InfraMachineConfig, machine_id);
        match self.store.get(&key) {
            Err(Error::NotFound(_)) => {
                self.create(Resource::new(
                    machine_id,
                    ResourceSpec::InfraMachineConfig(InfraMachineConfigSpec {
                        acceptance,
                        ..Default::default()
                    }),
                ))?;
            }
            Err(e) => return Err(e),
            Ok(mut current) => {
                if let Some(spec) = current.spec.as_infra_machine_config_mut() {
                    spec.acceptance = acceptance;
                }
                self.update(current)?;
            }
        }
        Ok(())
    }

    /// `maintenance-upgrade(machine, version)`: pins the machine's Talos
    /// install image through a machine-targeted patch at the top of the
    /// user weight band.
    pub fn maintenance_upgrade(&self, machine_id: &str, version: &str) -> Result<(), Error> {
        let fragment = format!(
            "machine:\n  install:\n    image: ghcr.io/siderolabs/installer:v{version}\n"
        );
        let id = format!("900-maintenance-upgrade-{machine_id}");
        let key = ResourceKey::in_default(Kind::ConfigPatch, &id);
        let data = MaybeCompressed::from_uncompressed(fragment.as_bytes(), &compression_config())?;

        match self.store.get(&key) {
            Err(Error::NotFound(_)) => {
                self.create(
                    Resource::new(&id, ResourceSpec::ConfigPatch(ConfigPatchSpec { data }))
                        .with_label(LABEL_MACHINE, machine_id),
                )?;
            }
            Err(e) => return Err(e),
            Ok(mut current) => {
                current.spec = ResourceSpec::ConfigPatch(ConfigPatchSpec { data });
                self.update(current)?;
            }
        }
        Ok(())
    }

    /// `import-cluster(...)`: creates the cluster locked and tainted, with
    /// its secrets imported verbatim.
    pub fn import_cluster(
        &self,
        cluster_id: &str,
        talos_version: &str,
        kubernetes_version: &str,
        secrets_yaml: &[u8],
        dry_run: bool,
    ) -> Result<(), Error> {
        serde_yaml::from_slice::<serde_yaml::Value>(secrets_yaml)
            .map_err(|e| Error::InvalidArgument(format!("imported secrets do not parse: {e}")))?;
        if dry_run {
            return Ok(());
        }

        let mut cluster = Resource::new(
            cluster_id,
            ResourceSpec::Cluster(ClusterSpec {
                talos_version: talos_version.to_string(),
                kubernetes_version: kubernetes_version.to_string(),
            }),
        );
        cluster
            .metadata
            .annotations
            .insert(ANNOTATION_LOCKED.to_string(), String::new());
        cluster
            .metadata
            .annotations
            .insert(ANNOTATION_TAINTED_IMPORTING.to_string(), String::new());
        self.create(cluster)?;

        self.create(Resource::new(
            cluster_id,
            ResourceSpec::ImportedClusterSecrets(ImportedClusterSecretsSpec {
                data: MaybeCompressed::from_uncompressed(secrets_yaml, &compression_config())?,
            }),
        ))?;
        info!(cluster = cluster_id, "cluster import started");
        Ok(())
    }

    /// `abort-import(cluster)`: only legal while the cluster is both locked
    /// and tainted by the import; removes the member links, then tears the
    /// cluster down.
    pub fn abort_import(&self, cluster_id: &str) -> Result<(), Error> {
        let cluster_key = ResourceKey::in_default(Kind::Cluster, cluster_id);
        let cluster = self.store.get(&cluster_key)?;
        if !cluster.metadata.has_annotation(ANNOTATION_LOCKED)
            || !cluster.metadata.has_annotation(ANNOTATION_TAINTED_IMPORTING)
        {
            return Err(Error::PreconditionFailed(format!(
                "cluster '{cluster_id}' is not an in-progress import"
            )));
        }

        let nodes = self.store.list(
            Namespace::Default,
            Kind::MachineSetNode,
            &ListOptions::selecting(Selectors::one(
                crate::core::selector::Selector::field_eq(LABEL_CLUSTER, cluster_id),
            )),
        )?;
        for node in nodes {
            let link_key = ResourceKey::in_default(Kind::Link, node.id());
            if self.store.get(&link_key).is_ok() {
                self.teardown(&link_key)?;
            }
        }

        self.teardown(&cluster_key)?;
        info!(cluster = cluster_id, "cluster import aborted");
        Ok(())
    }
}
