// src/core/cluster/mod.rs

//! The cluster lifecycle coordinator: status aggregation, the one-shot
//! etcd bootstrap, PKI management, and the destroy cascade.

pub mod bootstrap;
pub mod controller;
pub mod secrets;

pub use bootstrap::ClusterBootstrapController;
pub use controller::ClusterController;
pub use secrets::SecretsController;
