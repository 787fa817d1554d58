// src/core/runtime/mod.rs

//! The controller runtime: declarations, the reconcile contract, graph
//! assembly, and the scheduler driving per-controller reconcile loops.

pub mod backoff;
pub mod controller;
pub mod graph;
pub mod scheduler;

pub use backoff::Backoff;
pub use controller::{
    Controller, ControllerContext, ControllerDefinition, InputRole, InputSpec, ReconcileOutcome,
};
pub use scheduler::Scheduler;
