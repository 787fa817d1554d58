// src/core/errors.rs

//! Defines the primary error type for the entire control plane.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures surfaced by the store,
/// the controller runtime, and the external ports.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency failure: the observed version no longer matches.
    #[error("version conflict: expected {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    /// A writer attempted to mutate a resource owned by a different controller.
    #[error("owner conflict: resource is owned by '{owner}', writer is '{writer}'")]
    OwnerConflict { owner: String, writer: String },

    /// Destroy attempted while finalizers remain or the resource is still running.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Config-patch merge or validation failure, bound to the offending patch.
    #[error("invalid config (patch '{patch_id}'): {reason}")]
    InvalidConfig { patch_id: String, reason: String },

    /// Malformed or oversized compressed frame.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An external port (image factory, Talos apid, Kubernetes, backup store) is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A watch stream fell behind the bounded event buffer and was closed.
    #[error("watch stream overrun: {0} events dropped")]
    Overrun(u64),

    /// A controller-internal failure; marks the controller degraded.
    #[error("fatal controller error: {0}")]
    Fatal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transient failures are retried with jittered backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::Unavailable(_) | Error::Canceled
        )
    }

    /// User-induced failures land in a status resource and are not retried
    /// until an input changes.
    pub fn is_user_induced(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::InvalidConfig { .. })
    }

    /// Structural failures indicate a composition error and are raised to
    /// the operator as fatal.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::OwnerConflict { .. } | Error::PreconditionFailed(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(e) => Error::Io(Arc::clone(e)),
            Error::NotFound(s) => Error::NotFound(s.clone()),
            Error::AlreadyExists(s) => Error::AlreadyExists(s.clone()),
            Error::Conflict { expected, found } => Error::Conflict {
                expected: *expected,
                found: *found,
            },
            Error::OwnerConflict { owner, writer } => Error::OwnerConflict {
                owner: owner.clone(),
                writer: writer.clone(),
            },
            Error::PreconditionFailed(s) => Error::PreconditionFailed(s.clone()),
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::InvalidConfig { patch_id, reason } => Error::InvalidConfig {
                patch_id: patch_id.clone(),
                reason: reason.clone(),
            },
            Error::InvalidFormat(s) => Error::InvalidFormat(s.clone()),
            Error::PermissionDenied(s) => Error::PermissionDenied(s.clone()),
            Error::Unavailable(s) => Error::Unavailable(s.clone()),
            Error::Canceled => Error::Canceled,
            Error::DeadlineExceeded => Error::DeadlineExceeded,
            Error::Overrun(n) => Error::Overrun(*n),
            Error::Fatal(s) => Error::Fatal(s.clone()),
            Error::Internal(s) => Error::Internal(s.clone()),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Io(e1), Error::Io(e2)) => e1.to_string() == e2.to_string(),
            (Error::NotFound(s1), Error::NotFound(s2)) => s1 == s2,
            (Error::AlreadyExists(s1), Error::AlreadyExists(s2)) => s1 == s2,
            (
                Error::Conflict {
                    expected: e1,
                    found: f1,
                },
                Error::Conflict {
                    expected: e2,
                    found: f2,
                },
            ) => e1 == e2 && f1 == f2,
            (
                Error::OwnerConflict {
                    owner: o1,
                    writer: w1,
                },
                Error::OwnerConflict {
                    owner: o2,
                    writer: w2,
                },
            ) => o1 == o2 && w1 == w2,
            (Error::PreconditionFailed(s1), Error::PreconditionFailed(s2)) => s1 == s2,
            (Error::InvalidArgument(s1), Error::InvalidArgument(s2)) => s1 == s2,
            (
                Error::InvalidConfig {
                    patch_id: p1,
                    reason: r1,
                },
                Error::InvalidConfig {
                    patch_id: p2,
                    reason: r2,
                },
            ) => p1 == p2 && r1 == r2,
            (Error::InvalidFormat(s1), Error::InvalidFormat(s2)) => s1 == s2,
            (Error::PermissionDenied(s1), Error::PermissionDenied(s2)) => s1 == s2,
            (Error::Unavailable(s1), Error::Unavailable(s2)) => s1 == s2,
            (Error::Overrun(n1), Error::Overrun(n2)) => n1 == n2,
            (Error::Fatal(s1), Error::Fatal(s2)) => s1 == s2,
            (Error::Internal(s1), Error::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::Internal(format!("Failed to generate UUID: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::InvalidFormat(format!("YAML error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::DeadlineExceeded
    }
}
