//! The deferred-write buffer.
//!
//! An ordered mapping from key to the most-recently-deferred item for that
//! key (last write wins). A key present here shadows the backend for every
//! read issued through the pool until the buffer is cleared by commit or by
//! explicit deletion of the key. Iteration during commit runs in key order
//! so outcomes are deterministic.

use std::collections::BTreeMap;
use std::mem;

use stash_core::CacheItem;

/// In-memory staging area for writes not yet committed.
///
/// Private, unshared, per-pool state. Buffering cannot fail locally.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    items: BTreeMap<String, CacheItem>,
}

impl DeferredBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pending item for its key.
    pub fn insert(&mut self, item: CacheItem) {
        self.items.insert(item.key().to_string(), item);
    }

    /// The pending item for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&CacheItem> {
        self.items.get(key)
    }

    /// Drop the pending item for `key`.
    pub fn remove(&mut self, key: &str) -> Option<CacheItem> {
        self.items.remove(key)
    }

    /// Drop every pending item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Take every pending item, in key order, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = CacheItem> {
        mem::take(&mut self.items).into_values()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }
}
