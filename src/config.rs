// src/config.rs

//! Manages control-plane configuration: loading, defaults, and validation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::codec::CompressionConfig;

/// Configuration of the store's snapshot persistence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// Path of the snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// How often the snapshot is rewritten.
    #[serde(default = "default_snapshot_interval", with = "humantime_serde")]
    pub snapshot_interval: Duration,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("omnid.snapshot")
}
fn default_snapshot_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

/// Configuration of the advertised join endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SiderolinkConfig {
    /// The API URL machines dial, e.g. "https://omnid.example:8090".
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_events_port")]
    pub events_port: u16,
    #[serde(default = "default_logs_port")]
    pub logs_port: u16,
    #[serde(default)]
    pub use_grpc_tunnel: bool,
}

fn default_api_url() -> String {
    "https://localhost:8090".to_string()
}
fn default_events_port() -> u16 {
    8090
}
fn default_logs_port() -> u16 {
    8092
}

impl Default for SiderolinkConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            events_port: default_events_port(),
            logs_port: default_logs_port(),
            use_grpc_tunnel: false,
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

/// The top-level configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub siderolink: SiderolinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads the configuration from a TOML file; a missing file yields the
    /// defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            info!(path, "no config file found, using defaults");
            return Ok(Self {
                log_level: default_log_level(),
                ..Default::default()
            });
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: Config = settings
            .try_deserialize()
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.siderolink.api_url.is_empty(),
            "siderolink.api_url must not be empty"
        );
        anyhow::ensure!(
            self.compression.level >= 1 && self.compression.level <= 19,
            "compression.level must be between 1 and 19"
        );
        Ok(())
    }
}
