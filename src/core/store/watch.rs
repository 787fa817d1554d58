// src/core/store/watch.rs

//! Watch streams over the store's event bus.
//!
//! A watch first replays a consistent snapshot as `created` events, emits a
//! one-shot `bootstrapped` marker, then forwards live events. Live events
//! that are already covered by the snapshot are deduplicated by version.
//! A watcher that falls behind the bounded bus buffer is closed with
//! `overrun` and must resubscribe.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::core::Error;
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey};
use crate::core::selector::Selectors;

/// A single watch event. Per-resource events are totally ordered by the
/// resource version; `bootstrapped` fires once after the initial catch-up.
#[derive(Debug, Clone)]
pub enum Event {
    Created(Arc<Resource>),
    Updated {
        old: Arc<Resource>,
        new: Arc<Resource>,
    },
    Destroyed(Arc<Resource>),
    Bootstrapped,
}

impl Event {
    /// The resource the event refers to; `None` for the bootstrap marker.
    pub fn resource(&self) -> Option<&Arc<Resource>> {
        match self {
            Event::Created(res) | Event::Destroyed(res) => Some(res),
            Event::Updated { new, .. } => Some(new),
            Event::Bootstrapped => None,
        }
    }

    pub fn key(&self) -> Option<ResourceKey> {
        self.resource().map(|r| r.key())
    }
}

/// What a watch subscribes to: a whole kind or a single resource.
#[derive(Debug, Clone)]
pub(super) enum WatchScope {
    Kind {
        namespace: Namespace,
        kind: Kind,
        selectors: Selectors,
    },
    Key(ResourceKey),
}

impl WatchScope {
    fn matches(&self, res: &Resource) -> bool {
        match self {
            WatchScope::Kind {
                namespace,
                kind,
                selectors,
            } => {
                res.metadata.namespace == *namespace
                    && res.metadata.kind == *kind
                    && selectors.matches(&res.metadata.labels)
            }
            WatchScope::Key(key) => res.key() == *key,
        }
    }

    /// An update is delivered when either side of it matches, so watchers
    /// observe resources leaving their selector.
    fn matches_event(&self, event: &Event) -> bool {
        match event {
            Event::Created(res) | Event::Destroyed(res) => self.matches(res),
            Event::Updated { old, new } => self.matches(old) || self.matches(new),
            Event::Bootstrapped => false,
        }
    }
}

/// Builds the watch stream from a bus subscription and a consistent
/// snapshot taken while the subscription was already live.
pub(super) fn watch_stream(
    mut rx: broadcast::Receiver<Event>,
    snapshot: Vec<Arc<Resource>>,
    scope: WatchScope,
) -> impl Stream<Item = Result<Event, Error>> + Send {
    async_stream::stream! {
        // Seed the dedup map so live events already covered by the snapshot
        // are not replayed.
        let mut last_seen: HashMap<ResourceKey, u64> = HashMap::new();

        for res in snapshot {
            last_seen.insert(res.key(), res.metadata.version);
            yield Ok(Event::Created(res));
        }
        yield Ok(Event::Bootstrapped);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !scope.matches_event(&event) {
                        continue;
                    }
                    match &event {
                        Event::Created(res) | Event::Updated { new: res, .. } => {
                            let key = res.key();
                            let seen = last_seen.get(&key).copied().unwrap_or(0);
                            if res.metadata.version <= seen {
                                continue;
                            }
                            last_seen.insert(key, res.metadata.version);
                        }
                        Event::Destroyed(res) => {
                            last_seen.remove(&res.key());
                        }
                        Event::Bootstrapped => continue,
                    }
                    yield Ok(event);
                }
                Err(RecvError::Lagged(dropped)) => {
                    yield Err(Error::Overrun(dropped));
                    return;
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}
