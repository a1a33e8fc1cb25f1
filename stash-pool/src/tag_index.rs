//! The tag index: one backend list per tag, holding the keys tagged with it.
//!
//! List names live in their own namespace, derived deterministically from
//! the tag. The index is maintained with the backend's list primitives;
//! the pool facade translates failures, so everything here reports plain
//! [`BackendError`]s.
//!
//! The data write and the index writes around it are separate backend
//! operations with no cross-operation atomicity. A crash between them
//! leaves the index inconsistent with the data; that is an accepted
//! property of the backend contract, not something this module papers over.

use std::sync::Arc;

use stash_core::BackendError;
use stash_storage::StorageBackend;

/// Separator between the namespace prefix and the tag name.
const SEPARATOR: char = '!';

/// Name of the backend list holding the members of `tag`.
pub fn tag_list_key(tag: &str) -> String {
    format!("tag{SEPARATOR}{tag}")
}

/// Tag→member-keys index over a storage backend's named lists.
pub struct TagIndex<B> {
    backend: Arc<B>,
}

impl<B: StorageBackend> TagIndex<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// All item keys currently tagged with `tag`; absent tags are empty.
    pub fn members(&self, tag: &str) -> Result<Vec<String>, BackendError> {
        self.backend.list_members(&tag_list_key(tag))
    }

    /// Record that `key` carries `tag`. Idempotent.
    pub fn append(&self, tag: &str, key: &str) -> Result<(), BackendError> {
        self.backend.append_member(&tag_list_key(tag), key)
    }

    /// Record that `key` no longer carries `tag`.
    pub fn remove(&self, tag: &str, key: &str) -> Result<(), BackendError> {
        self.backend.remove_member(&tag_list_key(tag), key)
    }

    /// Drop the whole list for `tag`.
    pub fn drop_list(&self, tag: &str) -> Result<bool, BackendError> {
        self.backend.remove_list(&tag_list_key(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_storage::MemoryBackend;

    #[test]
    fn list_names_are_namespaced() {
        assert_eq!(tag_list_key("users"), "tag!users");
        assert_ne!(tag_list_key("a"), tag_list_key("b"));
    }

    #[test]
    fn append_remove_members() {
        let index = TagIndex::new(Arc::new(MemoryBackend::new()));

        index.append("t", "k1").unwrap();
        index.append("t", "k2").unwrap();
        index.append("t", "k1").unwrap(); // idempotent
        assert_eq!(index.members("t").unwrap(), vec!["k1", "k2"]);

        index.remove("t", "k1").unwrap();
        assert_eq!(index.members("t").unwrap(), vec!["k2"]);
    }

    #[test]
    fn absent_tag_is_empty() {
        let index = TagIndex::new(Arc::new(MemoryBackend::new()));
        assert!(index.members("nothing").unwrap().is_empty());
    }

    #[test]
    fn drop_list_clears_tag() {
        let index = TagIndex::new(Arc::new(MemoryBackend::new()));
        index.append("t", "k").unwrap();
        assert!(index.drop_list("t").unwrap());
        assert!(index.members("t").unwrap().is_empty());
    }
}
