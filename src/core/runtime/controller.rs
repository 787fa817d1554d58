// src/core/runtime/controller.rs

//! The controller contract: declaration, reconcile outcome, and the scoped
//! store context a reconcile runs against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::core::Error;
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey};
use crate::core::store::{ListOptions, Store, Writer};
use crate::core::store::watch::Event;

/// How an input participates in graph ordering. Strong inputs form
/// dependency edges at assembly; weak inputs only trigger reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Weak,
    Strong,
}

/// One declared controller input.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub namespace: Namespace,
    pub kind: Kind,
    pub role: InputRole,
}

impl InputSpec {
    pub fn strong(kind: Kind) -> Self {
        Self {
            namespace: kind.default_namespace(),
            kind,
            role: InputRole::Strong,
        }
    }

    pub fn weak(kind: Kind) -> Self {
        Self {
            namespace: kind.default_namespace(),
            kind,
            role: InputRole::Weak,
        }
    }
}

/// A controller's declaration: its name (which becomes the owner of its
/// outputs), inputs, and outputs.
#[derive(Debug, Clone)]
pub struct ControllerDefinition {
    pub name: String,
    pub inputs: Vec<InputSpec>,
    /// Output kinds; each kind has exactly one owning controller across the
    /// whole graph.
    pub outputs: Vec<Kind>,
}

/// What a reconcile asks the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; wait for the next input event.
    Ok,
    /// Run again after the given delay even without input changes.
    Requeue(Duration),
}

/// A reconciling controller.
///
/// Reconciles must be idempotent: repeating one without input change must
/// not produce store writes. CAS conflicts abort the reconcile; the
/// scheduler re-runs it with a small jitter.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    fn definition(&self) -> ControllerDefinition;

    /// Narrows which input events trigger reconciliation.
    fn qualifies(&self, _event: &Event) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error>;
}

/// The scoped store handle a reconcile runs against. All writes carry the
/// controller's identity, so owner enforcement happens in the store.
#[derive(Clone)]
pub struct ControllerContext {
    store: Arc<Store>,
    name: String,
    writer: Writer,
    cancelled: watch::Receiver<bool>,
}

impl ControllerContext {
    pub fn new(store: Arc<Store>, name: impl Into<String>, cancelled: watch::Receiver<bool>) -> Self {
        let name = name.into();
        Self {
            store,
            writer: Writer::controller(name.clone()),
            name,
            cancelled,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Cooperative cancellation check; called between store operations.
    pub fn check_cancelled(&self) -> Result<(), Error> {
        if *self.cancelled.borrow() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    pub fn get(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.get(key)
    }

    /// `get` that maps absence to `None` instead of an error.
    pub fn get_optional(&self, key: &ResourceKey) -> Result<Option<Resource>, Error> {
        match self.store.get(key) {
            Ok(res) => Ok(Some(res)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
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
        self.store.create(&self.writer, res.with_owner(&self.name))
    }

    pub fn update(&self, res: Resource) -> Result<Resource, Error> {
        self.store.update(&self.writer, res)
    }

    /// Create-or-update that skips the write when nothing would change.
    /// This is the primitive that keeps reconciles idempotent: running the
    /// same reconcile twice produces no second write.
    ///
    /// Returns true when a write happened.
    pub fn ensure(&self, res: Resource) -> Result<bool, Error> {
        let key = res.key();
        match self.store.get(&key) {
            Err(Error::NotFound(_)) => {
                self.create(res)?;
                Ok(true)
            }
            Err(e) => Err(e),
            Ok(current) => {
                if current.spec == res.spec
                    && current.metadata.labels == res.metadata.labels
                    && current.metadata.annotations == res.metadata.annotations
                {
                    return Ok(false);
                }
                let mut next = res.with_owner(&self.name);
                next.metadata.version = current.metadata.version;
                self.store.update(&self.writer, next)?;
                Ok(true)
            }
        }
    }

    pub fn teardown(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.teardown(&self.writer, key)
    }

    pub fn destroy(&self, key: &ResourceKey) -> Result<(), Error> {
        self.store.destroy(&self.writer, key)
    }

    /// Tears a resource down and destroys it once its finalizers drain.
    /// Returns true once the resource is gone.
    pub fn teardown_and_destroy(&self, key: &ResourceKey) -> Result<bool, Error> {
        let res = match self.store.get(key) {
            Err(Error::NotFound(_)) => return Ok(true),
            other => other?,
        };
        if !res.metadata.is_tearing_down() {
            self.store.teardown(&self.writer, key)?;
        }
        let res = self.store.get(key)?;
        if res.metadata.finalizers.is_empty() {
            self.store.destroy(&self.writer, key)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Claims this controller's finalizer on a dependency.
    pub fn add_finalizer(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.add_finalizer(key, &self.name)
    }

    /// Releases this controller's finalizer after cleanup.
    pub fn remove_finalizer(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.store.remove_finalizer(key, &self.name)
    }
}
