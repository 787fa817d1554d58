// src/core/store/mod.rs

//! The resource store: typed resources, namespaces, CAS updates, watch
//! streams, finalizers, and snapshot persistence.

pub mod core;
pub mod persistence;
pub mod watch;

pub use self::core::{GetOptions, ListOptions, SortBy, Store, Writer};
pub use watch::Event;
