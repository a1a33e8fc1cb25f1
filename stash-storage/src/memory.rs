//! In-process storage backend.
//!
//! A `RwLock<HashMap>` pair, one map for entries and one for lists. Expiry
//! is absolute: the TTL handed to `store` is resolved to a timestamp
//! immediately, and `fetch` reports entries past it as misses.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;

use stash_core::{BackendError, ItemSnapshot, TagSet, Timestamp, Value};

use crate::StorageBackend;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    tags: TagSet,
    expires_at: Option<Timestamp>,
}

impl StoredEntry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Utc::now())
    }
}

/// In-memory storage backend.
///
/// Thread-safe; a poisoned lock surfaces as
/// [`BackendError::LockPoisoned`] rather than panicking the caller.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
    lists: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| !e.expired()).count())
            .unwrap_or(0)
    }

    /// True when no live entries exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn fetch(&self, key: &str) -> Result<ItemSnapshot, BackendError> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        match entries.get(key) {
            Some(entry) if !entry.expired() => Ok(ItemSnapshot::hit(
                entry.value.clone(),
                entry.tags.clone(),
                entry.expires_at,
            )),
            _ => Ok(ItemSnapshot::miss()),
        }
    }

    fn store(
        &self,
        key: &str,
        value: &Value,
        tags: &TagSet,
        ttl: Option<Duration>,
    ) -> Result<bool, BackendError> {
        let expires_at = ttl.and_then(|d| {
            let delta = chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX);
            Utc::now().checked_add_signed(delta)
        });

        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.clone(),
                tags: tags.clone(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        entries.remove(key);
        Ok(true)
    }

    fn clear_all(&self) -> Result<bool, BackendError> {
        self.entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .clear();
        self.lists
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .clear();
        Ok(true)
    }

    fn list_members(&self, list: &str) -> Result<Vec<String>, BackendError> {
        let lists = self.lists.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(lists
            .get(list)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_list(&self, list: &str) -> Result<bool, BackendError> {
        let mut lists = self.lists.write().map_err(|_| BackendError::LockPoisoned)?;
        lists.remove(list);
        Ok(true)
    }

    fn append_member(&self, list: &str, member: &str) -> Result<(), BackendError> {
        let mut lists = self.lists.write().map_err(|_| BackendError::LockPoisoned)?;
        lists
            .entry(list.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn remove_member(&self, list: &str, member: &str) -> Result<(), BackendError> {
        let mut lists = self.lists.write().map_err(|_| BackendError::LockPoisoned)?;
        if let Some(members) = lists.get_mut(list) {
            members.remove(member);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(names: &[&str]) -> TagSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fetch_miss_on_empty_backend() {
        let backend = MemoryBackend::new();
        let snapshot = backend.fetch("absent").unwrap();
        assert!(!snapshot.is_hit);
        assert!(snapshot.value.is_none());
        assert!(snapshot.tags.is_empty());
    }

    #[test]
    fn store_then_fetch_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .store("k", &json!({"n": 1}), &tags(&["t"]), None)
            .unwrap();

        let snapshot = backend.fetch("k").unwrap();
        assert!(snapshot.is_hit);
        assert_eq!(snapshot.value, Some(json!({"n": 1})));
        assert_eq!(snapshot.tags, tags(&["t"]));
        assert_eq!(snapshot.expiration, None);
    }

    #[test]
    fn zero_ttl_reads_back_as_miss() {
        let backend = MemoryBackend::new();
        backend
            .store("k", &json!(1), &TagSet::new(), Some(Duration::ZERO))
            .unwrap();
        assert!(!backend.fetch("k").unwrap().is_hit);
    }

    #[test]
    fn ttl_resolves_to_absolute_expiration() {
        let backend = MemoryBackend::new();
        backend
            .store("k", &json!(1), &TagSet::new(), Some(Duration::from_secs(60)))
            .unwrap();

        let snapshot = backend.fetch("k").unwrap();
        assert!(snapshot.is_hit);
        let at = snapshot.expiration.expect("expiration should be set");
        assert!(at > Utc::now());
    }

    #[test]
    fn remove_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.store("k", &json!(1), &TagSet::new(), None).unwrap();
        assert!(backend.remove("k").unwrap());
        assert!(backend.remove("k").unwrap());
        assert!(!backend.fetch("k").unwrap().is_hit);
    }

    #[test]
    fn clear_all_drops_entries_and_lists() {
        let backend = MemoryBackend::new();
        backend.store("k", &json!(1), &TagSet::new(), None).unwrap();
        backend.append_member("list", "m").unwrap();

        assert!(backend.clear_all().unwrap());
        assert!(!backend.fetch("k").unwrap().is_hit);
        assert!(backend.list_members("list").unwrap().is_empty());
    }

    #[test]
    fn append_member_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.append_member("list", "a").unwrap();
        backend.append_member("list", "a").unwrap();
        backend.append_member("list", "b").unwrap();

        assert_eq!(backend.list_members("list").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn remove_member_and_absent_list_are_noops() {
        let backend = MemoryBackend::new();
        backend.remove_member("nope", "a").unwrap();

        backend.append_member("list", "a").unwrap();
        backend.remove_member("list", "a").unwrap();
        assert!(backend.list_members("list").unwrap().is_empty());
    }

    #[test]
    fn remove_list_on_absent_list_succeeds() {
        let backend = MemoryBackend::new();
        assert!(backend.remove_list("nope").unwrap());
    }

    #[test]
    fn len_ignores_expired_entries() {
        let backend = MemoryBackend::new();
        backend.store("live", &json!(1), &TagSet::new(), None).unwrap();
        backend
            .store("dead", &json!(2), &TagSet::new(), Some(Duration::ZERO))
            .unwrap();
        assert_eq!(backend.len(), 1);
    }
}
