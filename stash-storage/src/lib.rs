//! Stash Storage - Backend Contract and Concrete Backends
//!
//! Defines the storage abstraction the cache pool is built on: a point
//! read/write/delete key-value store plus named-list primitives used for the
//! tag index. Any key-value store (in-process map, memory-mapped file,
//! remote cache server) can implement this contract.
//!
//! Two backends ship with the crate: [`MemoryBackend`] for in-process use
//! and tests, and [`LmdbBackend`] for a persistent memory-mapped store.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbBackend;
pub use memory::MemoryBackend;

use std::time::Duration;

use stash_core::{BackendError, ItemSnapshot, TagSet, Value};

/// Pluggable storage backend for the cache pool.
///
/// # Atomicity
///
/// Implementations provide at most per-operation atomicity. The pool never
/// assumes cross-operation atomicity: a data write and the tag-index writes
/// around it are separate calls, and a crash between them leaves the index
/// inconsistent with the data. That gap is part of this contract.
///
/// # Lists
///
/// Lists hold a set of members even if the underlying storage primitive is
/// a sequence: [`append_member`](StorageBackend::append_member) is
/// idempotent, and [`list_members`](StorageBackend::list_members) never
/// reports duplicates.
pub trait StorageBackend: Send + Sync + 'static {
    /// Point read. A miss returns [`ItemSnapshot::miss`].
    ///
    /// An entry whose expiration has passed reads back as a miss.
    fn fetch(&self, key: &str) -> Result<ItemSnapshot, BackendError>;

    /// Point write with an optional TTL; no TTL means "no expiration".
    ///
    /// Returns the backend's success signal.
    fn store(
        &self,
        key: &str,
        value: &Value,
        tags: &TagSet,
        ttl: Option<Duration>,
    ) -> Result<bool, BackendError>;

    /// Point delete. Deleting an absent key is a success.
    fn remove(&self, key: &str) -> Result<bool, BackendError>;

    /// Drop every entry and every list.
    fn clear_all(&self) -> Result<bool, BackendError>;

    /// All members of a named list; an absent list is empty.
    fn list_members(&self, list: &str) -> Result<Vec<String>, BackendError>;

    /// Delete a named list entirely. Deleting an absent list is a success.
    fn remove_list(&self, list: &str) -> Result<bool, BackendError>;

    /// Add a member to a named list, creating the list if needed.
    /// Idempotent: appending an existing member is a no-op.
    fn append_member(&self, list: &str, member: &str) -> Result<(), BackendError>;

    /// Remove a member from a named list, if present.
    fn remove_member(&self, list: &str, member: &str) -> Result<(), BackendError>;
}
