// src/core/metrics.rs

//! Defines and registers Prometheus metrics for control-plane monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Store gauges ---
    /// The number of resources currently held by the store.
    pub static ref STORE_RESOURCES: Gauge =
        register_gauge!("omnid_store_resources", "Number of resources currently in the store.").unwrap();
    /// The number of machines with an established link.
    pub static ref CONNECTED_MACHINES: Gauge =
        register_gauge!("omnid_connected_machines", "Number of machines with an established siderolink tunnel.").unwrap();

    // --- Runtime counters ---
    /// The total number of reconciles executed, labeled by controller.
    pub static ref RECONCILES_TOTAL: CounterVec =
        register_counter_vec!("omnid_reconciles_total", "Total number of reconciles executed, labeled by controller.", &["controller"]).unwrap();
    /// The total number of reconciles aborted by a CAS conflict.
    pub static ref CAS_CONFLICTS_TOTAL: Counter =
        register_counter!("omnid_cas_conflicts_total", "Total number of reconciles aborted by an optimistic-concurrency conflict.").unwrap();
    /// The total number of fatal reconcile errors.
    pub static ref FATAL_RECONCILES_TOTAL: Counter =
        register_counter!("omnid_fatal_reconciles_total", "Total number of reconciles that ended in a fatal error.").unwrap();
    /// The total number of watch streams closed for falling behind.
    pub static ref WATCH_OVERRUNS_TOTAL: Counter =
        register_counter!("omnid_watch_overruns_total", "Total number of watch streams closed with an overrun.").unwrap();
    /// The total number of store snapshots saved.
    pub static ref SNAPSHOTS_SAVED_TOTAL: Counter =
        register_counter!("omnid_snapshots_saved_total", "Total number of store snapshots written to disk.").unwrap();

    // --- Histograms ---
    /// A histogram of reconcile latencies.
    pub static ref RECONCILE_LATENCY_SECONDS: Histogram =
        register_histogram!("omnid_reconcile_latency_seconds", "Latency of controller reconciles in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
