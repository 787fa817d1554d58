// src/core/store/core.rs

//! The resource store: a single linearizable writer over a namespaced,
//! versioned keyspace, with optimistic concurrency, owner enforcement,
//! finalizers, and an event bus feeding watches.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::watch::{Event, WatchScope, watch_stream};
use crate::core::Error;
use crate::core::resource::{Kind, Namespace, Phase, Resource, ResourceKey};
use crate::core::selector::Selectors;

/// The capacity of the watch event bus. Large enough to absorb reconcile
/// bursts; a watcher that still falls behind is closed with `overrun`.
const WATCH_BUS_CAPACITY: usize = 8192;

/// User config-patch weights must fall in this band; the reserved system
/// bands (0, 200, 400) live outside it.
const USER_PATCH_WEIGHT_MIN: u32 = 100;
const USER_PATCH_WEIGHT_MAX: u32 = 900;

/// The identity performing a store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    /// A controller; its name becomes (and must match) the resource owner.
    Controller(String),
    /// The external API surface acting for a user or provider role.
    External,
}

impl Writer {
    pub fn controller(name: impl Into<String>) -> Self {
        Writer::Controller(name.into())
    }

    fn name(&self) -> &str {
        match self {
            Writer::Controller(name) => name,
            Writer::External => "external",
        }
    }
}

/// Sort key for list results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Id,
    Created,
    Updated,
    /// The kind's declared search field; resources without one sort last.
    Search,
}

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub selectors: Selectors,
    pub sort_by: SortBy,
    pub descending: bool,
    pub offset: usize,
    /// Zero means no limit.
    pub limit: usize,
}

impl ListOptions {
    pub fn selecting(selectors: impl Into<Selectors>) -> Self {
        Self {
            selectors: selectors.into(),
            ..Default::default()
        }
    }
}

/// Options for `get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// When set, the read fails with `not-found` unless the current version
    /// matches; the store keeps no history.
    pub version: Option<u64>,
}

#[derive(Default)]
struct StoreInner {
    resources: BTreeMap<ResourceKey, Arc<Resource>>,
}

/// The resource store. Reads and watches are served concurrently; every
/// write is a single linearizable operation under the write lock, and its
/// event is published before the lock is released.
pub struct Store {
    inner: RwLock<StoreInner>,
    bus: broadcast::Sender<Event>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(WATCH_BUS_CAPACITY);
        Self {
            inner: RwLock::new(StoreInner::default()),
            bus,
        }
    }

    /// Creates a resource. The key must be unoccupied; version becomes 1.
    pub fn create(&self, writer: &Writer, mut res: Resource) -> Result<Resource, Error> {
        if res.metadata.id.is_empty() {
            return Err(Error::InvalidArgument("empty resource id".to_string()));
        }
        self.validate_write(writer, &res, None)?;

        let mut inner = self.inner.write();
        let key = res.key();
        if inner.resources.contains_key(&key) {
            return Err(Error::AlreadyExists(key.to_string()));
        }

        let now = Utc::now();
        res.metadata.version = 1;
        res.metadata.created = now;
        res.metadata.updated = now;
        res.metadata.phase = Phase::Running;
        res.metadata.finalizers.clear();

        let res = Arc::new(res);
        inner.resources.insert(key, Arc::clone(&res));
        self.publish(Event::Created(Arc::clone(&res)));
        Ok((*res).clone())
    }

    /// Reads a resource by key.
    pub fn get(&self, key: &ResourceKey) -> Result<Resource, Error> {
        self.get_with(key, &GetOptions::default())
    }

    pub fn get_with(&self, key: &ResourceKey, opts: &GetOptions) -> Result<Resource, Error> {
        let inner = self.inner.read();
        let res = inner
            .resources
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(version) = opts.version {
            if res.metadata.version != version {
                return Err(Error::NotFound(format!("{key} at version {version}")));
            }
        }
        Ok((**res).clone())
    }

    /// Lists resources of one kind in one namespace.
    pub fn list(
        &self,
        namespace: Namespace,
        kind: Kind,
        opts: &ListOptions,
    ) -> Result<Vec<Resource>, Error> {
        let inner = self.inner.read();
        let mut out: Vec<&Arc<Resource>> = inner
            .resources
            .range(range_of(namespace, kind))
            .map(|(_, res)| res)
            .filter(|res| opts.selectors.matches(&res.metadata.labels))
            .collect();

        match opts.sort_by {
            SortBy::Id => {} // BTreeMap iteration is already id-ordered.
            SortBy::Created => out.sort_by_key(|r| r.metadata.created),
            SortBy::Updated => out.sort_by_key(|r| r.metadata.updated),
            SortBy::Search => out.sort_by_key(|r| (r.search_field().is_none(), r.search_field())),
        }
        if opts.descending {
            out.reverse();
        }

        let iter = out.into_iter().skip(opts.offset);
        let collected: Vec<Resource> = if opts.limit > 0 {
            iter.take(opts.limit).map(|r| (**r).clone()).collect()
        } else {
            iter.map(|r| (**r).clone()).collect()
        };
        Ok(collected)
    }

    /// Compare-and-swap update. The observed version is taken from
    /// `res.metadata.version`; a mismatch with the stored version fails
    /// with `conflict`. Phase, finalizers, creation time, and owner are
    /// carried over from the stored resource.
    pub fn update(&self, writer: &Writer, mut res: Resource) -> Result<Resource, Error> {
        let mut inner = self.inner.write();
        let key = res.key();
        let current = inner
            .resources
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if res.metadata.version != current.metadata.version {
            return Err(Error::Conflict {
                expected: res.metadata.version,
                found: current.metadata.version,
            });
        }
        if res.metadata.owner != current.metadata.owner {
            return Err(Error::InvalidArgument(format!(
                "owner of '{key}' is immutable once set"
            )));
        }
        self.validate_write(writer, &res, Some(current))?;

        res.metadata.version = current.metadata.version + 1;
        res.metadata.created = current.metadata.created;
        res.metadata.updated = Utc::now();
        res.metadata.phase = current.metadata.phase;
        res.metadata.finalizers = current.metadata.finalizers.clone();

        let old = Arc::clone(current);
        let new = Arc::new(res);
        inner.resources.insert(key, Arc::clone(&new));
        self.publish(Event::Updated {
            old,
            new: Arc::clone(&new),
        });
        Ok((*new).clone())
    }

    /// Transitions a resource to tearing-down. Idempotent: tearing down a
    /// resource that already is produces no new version and no event.
    pub fn teardown(&self, writer: &Writer, key: &ResourceKey) -> Result<Resource, Error> {
        let mut inner = self.inner.write();
        let current = inner
            .resources
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        self.check_lifecycle_authority(writer, current)?;

        if current.metadata.phase == Phase::TearingDown {
            return Ok((**current).clone());
        }

        let mut next = (**current).clone();
        next.metadata.phase = Phase::TearingDown;
        next.metadata.version += 1;
        next.metadata.updated = Utc::now();

        let old = Arc::clone(current);
        let new = Arc::new(next);
        inner.resources.insert(key.clone(), Arc::clone(&new));
        self.publish(Event::Updated {
            old,
            new: Arc::clone(&new),
        });
        Ok((*new).clone())
    }

    /// Destroys a resource. Requires tearing-down phase and an empty
    /// finalizer set.
    pub fn destroy(&self, writer: &Writer, key: &ResourceKey) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let current = inner
            .resources
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        self.check_lifecycle_authority(writer, current)?;

        if current.metadata.phase != Phase::TearingDown {
            return Err(Error::PreconditionFailed(format!(
                "'{key}' is not tearing down"
            )));
        }
        if !current.metadata.finalizers.is_empty() {
            return Err(Error::PreconditionFailed(format!(
                "'{key}' still has finalizers: {:?}",
                current.metadata.finalizers
            )));
        }

        let removed = inner.resources.remove(key).expect("checked above");
        self.publish(Event::Destroyed(removed));
        Ok(())
    }

    /// Adds a finalizer. Any controller may claim a finalizer on any
    /// resource regardless of ownership; the claim bumps the version.
    /// Idempotent for an already-present finalizer.
    pub fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Resource, Error> {
        self.mutate_finalizers(key, |finalizers| finalizers.insert(finalizer.to_string()))
    }

    /// Removes a finalizer; idempotent for an absent one.
    pub fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Resource, Error> {
        self.mutate_finalizers(key, |finalizers| finalizers.shift_remove(finalizer))
    }

    fn mutate_finalizers(
        &self,
        key: &ResourceKey,
        apply: impl FnOnce(&mut indexmap::IndexSet<String>) -> bool,
    ) -> Result<Resource, Error> {
        let mut inner = self.inner.write();
        let current = inner
            .resources
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let mut next = (**current).clone();
        if !apply(&mut next.metadata.finalizers) {
            return Ok((**current).clone());
        }
        next.metadata.version += 1;
        next.metadata.updated = Utc::now();

        let old = Arc::clone(current);
        let new = Arc::new(next);
        inner.resources.insert(key.clone(), Arc::clone(&new));
        self.publish(Event::Updated {
            old,
            new: Arc::clone(&new),
        });
        Ok((*new).clone())
    }

    /// Watches one kind in one namespace. The stream replays a consistent
    /// snapshot as `created` events, emits `bootstrapped`, then follows
    /// live events.
    pub fn watch_kind(
        &self,
        namespace: Namespace,
        kind: Kind,
        selectors: Selectors,
    ) -> impl Stream<Item = Result<Event, Error>> + Send + use<> {
        // Subscribe first, then snapshot under the read lock: a write
        // either lands in the snapshot or in the subscription, never
        // neither. Duplicates are version-deduplicated in the stream.
        let rx = self.bus.subscribe();
        let snapshot: Vec<Arc<Resource>> = {
            let inner = self.inner.read();
            inner
                .resources
                .range(range_of(namespace, kind))
                .map(|(_, res)| Arc::clone(res))
                .filter(|res| selectors.matches(&res.metadata.labels))
                .collect()
        };
        watch_stream(
            rx,
            snapshot,
            WatchScope::Kind {
                namespace,
                kind,
                selectors,
            },
        )
    }

    /// Watches a single resource key.
    pub fn watch(
        &self,
        key: &ResourceKey,
    ) -> impl Stream<Item = Result<Event, Error>> + Send + use<> {
        let rx = self.bus.subscribe();
        let snapshot: Vec<Arc<Resource>> = {
            let inner = self.inner.read();
            inner.resources.get(key).map(Arc::clone).into_iter().collect()
        };
        watch_stream(rx, snapshot, WatchScope::Key(key.clone()))
    }

    /// All resources in persistent namespaces, for the snapshot saver.
    pub fn snapshot_persistent(&self) -> Vec<Resource> {
        let inner = self.inner.read();
        inner
            .resources
            .values()
            .filter(|res| res.metadata.namespace.is_persistent())
            .map(|res| (**res).clone())
            .collect()
    }

    /// Reinserts resources from a loaded snapshot without emitting events.
    /// Only valid before any watch or controller is running.
    pub fn restore(&self, resources: Vec<Resource>) {
        let mut inner = self.inner.write();
        for res in resources {
            if !res.metadata.namespace.is_persistent() {
                debug!(key = %res.key(), "skipping non-persistent resource in snapshot");
                continue;
            }
            inner.resources.insert(res.key(), Arc::new(res));
        }
    }

    /// The number of resources currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().resources.is_empty()
    }

    fn publish(&self, event: Event) {
        // No receivers is fine; watches come and go.
        let _ = self.bus.send(event);
    }

    /// Owner and label validation shared by create and update.
    fn validate_write(
        &self,
        writer: &Writer,
        res: &Resource,
        current: Option<&Arc<Resource>>,
    ) -> Result<(), Error> {
        let owner = current
            .map(|c| c.metadata.owner.as_deref())
            .unwrap_or(res.metadata.owner.as_deref());

        match (owner, writer) {
            (Some(owner), Writer::Controller(name)) if owner == name => {}
            (Some(owner), _) => {
                return Err(Error::OwnerConflict {
                    owner: owner.to_string(),
                    writer: writer.name().to_string(),
                });
            }
            (None, _) => {}
        }

        if matches!(writer, Writer::External) {
            res.metadata
                .labels
                .validate_user_write(current.map(|c| &c.metadata.labels))?;
            if res.metadata.kind == Kind::ConfigPatch {
                validate_user_patch_weight(&res.metadata.id)?;
            }
        }
        Ok(())
    }

    /// Lifecycle operations (teardown/destroy) follow the same authority
    /// rule as spec mutation: owned resources yield only to their owner.
    fn check_lifecycle_authority(
        &self,
        writer: &Writer,
        current: &Arc<Resource>,
    ) -> Result<(), Error> {
        match (&current.metadata.owner, writer) {
            (Some(owner), Writer::Controller(name)) if owner == name => Ok(()),
            (Some(owner), _) => Err(Error::OwnerConflict {
                owner: owner.clone(),
                writer: writer.name().to_string(),
            }),
            (None, _) => Ok(()),
        }
    }
}

/// Key range covering every id of `(namespace, kind)`.
fn range_of(namespace: Namespace, kind: Kind) -> std::ops::RangeInclusive<ResourceKey> {
    ResourceKey::new(namespace, kind, String::new())
        ..=ResourceKey::new(namespace, kind, "\u{10FFFF}".to_string())
}

/// User patch ids carry their weight as an `NNN-` prefix; weights outside
/// the user band are reserved for system patches.
fn validate_user_patch_weight(id: &str) -> Result<(), Error> {
    let weight = crate::core::patch::weight_of(id)?;
    if !(USER_PATCH_WEIGHT_MIN..=USER_PATCH_WEIGHT_MAX).contains(&weight) {
        return Err(Error::InvalidArgument(format!(
            "config patch weight {weight} is outside the user band \
             {USER_PATCH_WEIGHT_MIN}-{USER_PATCH_WEIGHT_MAX}"
        )));
    }
    Ok(())
}
