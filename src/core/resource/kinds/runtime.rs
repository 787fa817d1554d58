// src/core/resource/kinds/runtime.rs

//! Controller health reporting.

use serde::{Deserialize, Serialize};

/// Per-controller health, written by the scheduler into the metrics
/// namespace. A fatal reconcile error marks the controller degraded without
/// crashing the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatusSpec {
    pub degraded: bool,
    #[serde(default)]
    pub last_error: String,
    pub reconcile_count: u64,
}
