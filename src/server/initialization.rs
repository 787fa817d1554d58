// src/server/initialization.rs

//! Builds the server context: compression policy, store, snapshot load,
//! and the singleton join-endpoint configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

use super::context::ServerContext;
use crate::config::Config;
use crate::core::codec::set_compression_config;
use crate::core::ports::Ports;
use crate::core::resource::kinds::SiderolinkApiConfigSpec;
use crate::core::resource::{Kind, Resource, ResourceKey, ResourceSpec};
use crate::core::siderolink::SIDEROLINK_API_CONFIG_ID;
use crate::core::store::persistence::load_snapshot;
use crate::core::store::{Store, Writer};

pub async fn setup(config: Config) -> Result<ServerContext> {
    set_compression_config(config.compression);

    let store = Arc::new(Store::new());
    load_snapshot(&store, &config.store.snapshot_path)
        .await
        .context("failed to load store snapshot")?;

    publish_siderolink_config(&store, &config)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    info!(resources = store.len(), "server context initialized");

    Ok(ServerContext {
        config,
        store,
        ports: Ports::offline(),
        shutdown_tx,
        tasks: JoinSet::new(),
    })
}

/// Mirrors the configured join endpoint into its singleton resource so
/// controllers and join artifacts observe one source of truth.
fn publish_siderolink_config(store: &Store, config: &Config) -> Result<()> {
    let spec = SiderolinkApiConfigSpec {
        api_url: config.siderolink.api_url.clone(),
        events_port: config.siderolink.events_port,
        logs_port: config.siderolink.logs_port,
        use_grpc_tunnel: config.siderolink.use_grpc_tunnel,
    };

    let writer = Writer::External;
    let key = ResourceKey::in_default(Kind::SiderolinkApiConfig, SIDEROLINK_API_CONFIG_ID);
    match store.get(&key) {
        Err(_) => {
            store.create(
                &writer,
                Resource::new(
                    SIDEROLINK_API_CONFIG_ID,
                    ResourceSpec::SiderolinkApiConfig(spec),
                ),
            )?;
        }
        Ok(current) => {
            if current.spec.as_siderolink_api_config() != Some(&spec) {
                let mut next = current;
                next.spec = ResourceSpec::SiderolinkApiConfig(spec);
                store.update(&writer, next)?;
            }
        }
    }
    Ok(())
}
