//! LMDB-backed storage using the heed crate.
//!
//! A persistent, memory-mapped backend: one named database for entries and
//! one for the named lists the tag index lives in. Values are serde_json
//! encoded; read transactions serve `fetch`/`list_members`, write
//! transactions everything else. LMDB gives per-operation (per-transaction)
//! atomicity, nothing across operations.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};

use stash_core::{BackendError, ItemSnapshot, TagSet, Timestamp, Value};

use crate::StorageBackend;

/// One persisted cache entry.
#[derive(Debug, Serialize, Deserialize)]
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

fn txn_err(e: heed::Error) -> BackendError {
    BackendError::Transaction(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BackendError> {
    serde_json::to_vec(value).map_err(|e| BackendError::Serialization(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, BackendError> {
    serde_json::from_slice(bytes).map_err(|e| BackendError::Deserialization(e.to_string()))
}

/// LMDB-backed storage backend.
///
/// # Example
///
/// ```ignore
/// let backend = LmdbBackend::new("/var/cache/stash", 100)?;
/// backend.store("greeting", &serde_json::json!("hi"), &TagSet::new(), None)?;
/// ```
pub struct LmdbBackend {
    env: Env,
    entries: Database<Str, Bytes>,
    lists: Database<Str, Bytes>,
}

impl LmdbBackend {
    /// Open (or create) an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where the LMDB files live
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or the environment or
    /// databases cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, BackendError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| BackendError::Other(format!("failed to open LMDB environment: {e}")))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let entries = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(|e| BackendError::Other(format!("failed to open database: {e}")))?;
        let lists = env
            .create_database(&mut wtxn, Some("lists"))
            .map_err(|e| BackendError::Other(format!("failed to open database: {e}")))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            entries,
            lists,
        })
    }

    /// Read a list into its set representation; absent lists are empty.
    fn read_list(
        &self,
        txn: &heed::RoTxn<'_>,
        list: &str,
    ) -> Result<BTreeSet<String>, BackendError> {
        match self.lists.get(txn, list).map_err(txn_err)? {
            Some(bytes) => decode(bytes),
            None => Ok(BTreeSet::new()),
        }
    }
}

impl StorageBackend for LmdbBackend {
    fn fetch(&self, key: &str) -> Result<ItemSnapshot, BackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.entries.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => {
                let entry: StoredEntry = decode(bytes)?;
                if entry.expired() {
                    Ok(ItemSnapshot::miss())
                } else {
                    Ok(ItemSnapshot::hit(entry.value, entry.tags, entry.expires_at))
                }
            }
            None => Ok(ItemSnapshot::miss()),
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
        let entry = StoredEntry {
            value: value.clone(),
            tags: tags.clone(),
            expires_at,
        };
        let bytes = encode(&entry)?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.entries.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.entries.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn clear_all(&self) -> Result<bool, BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.entries.clear(&mut wtxn).map_err(txn_err)?;
        self.lists.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn list_members(&self, list: &str) -> Result<Vec<String>, BackendError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let members = self.read_list(&rtxn, list)?;
        Ok(members.into_iter().collect())
    }

    fn remove_list(&self, list: &str) -> Result<bool, BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.lists.delete(&mut wtxn, list).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn append_member(&self, list: &str, member: &str) -> Result<(), BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut members = match self.lists.get(&wtxn, list).map_err(txn_err)? {
            Some(bytes) => decode::<BTreeSet<String>>(bytes)?,
            None => BTreeSet::new(),
        };
        if members.insert(member.to_string()) {
            let bytes = encode(&members)?;
            self.lists.put(&mut wtxn, list, &bytes).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn remove_member(&self, list: &str, member: &str) -> Result<(), BackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut members = match self.lists.get(&wtxn, list).map_err(txn_err)? {
            Some(bytes) => decode::<BTreeSet<String>>(bytes)?,
            None => BTreeSet::new(),
        };
        if members.remove(member) {
            let bytes = encode(&members)?;
            self.lists.put(&mut wtxn, list, &bytes).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn tags(names: &[&str]) -> TagSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_backend_opens() {
        let (backend, _temp_dir) = create_test_backend();
        drop(backend);
    }

    #[test]
    fn store_and_fetch() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .store("k", &json!({"hello": "world"}), &tags(&["t1", "t2"]), None)
            .expect("store should succeed");

        let snapshot = backend.fetch("k").expect("fetch should succeed");
        assert!(snapshot.is_hit);
        assert_eq!(snapshot.value, Some(json!({"hello": "world"})));
        assert_eq!(snapshot.tags, tags(&["t1", "t2"]));
    }

    #[test]
    fn fetch_nonexistent_is_miss() {
        let (backend, _temp_dir) = create_test_backend();
        assert!(!backend.fetch("absent").expect("fetch should succeed").is_hit);
    }

    #[test]
    fn expired_entry_reads_back_as_miss() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .store("k", &json!(1), &TagSet::new(), Some(Duration::ZERO))
            .expect("store should succeed");
        assert!(!backend.fetch("k").expect("fetch should succeed").is_hit);
    }

    #[test]
    fn remove_deletes_entry() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .store("k", &json!(1), &TagSet::new(), None)
            .expect("store should succeed");

        assert!(backend.remove("k").expect("remove should succeed"));
        assert!(!backend.fetch("k").expect("fetch should succeed").is_hit);
        // Removing again is still a success.
        assert!(backend.remove("k").expect("remove should succeed"));
    }

    #[test]
    fn clear_all_wipes_entries_and_lists() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .store("k", &json!(1), &TagSet::new(), None)
            .expect("store should succeed");
        backend
            .append_member("list", "m")
            .expect("append should succeed");

        assert!(backend.clear_all().expect("clear_all should succeed"));
        assert!(!backend.fetch("k").expect("fetch should succeed").is_hit);
        assert!(backend
            .list_members("list")
            .expect("list_members should succeed")
            .is_empty());
    }

    #[test]
    fn list_membership_is_a_set() {
        let (backend, _temp_dir) = create_test_backend();
        backend.append_member("list", "b").expect("append");
        backend.append_member("list", "a").expect("append");
        backend.append_member("list", "a").expect("append");

        assert_eq!(
            backend.list_members("list").expect("list_members"),
            vec!["a", "b"]
        );

        backend.remove_member("list", "a").expect("remove_member");
        assert_eq!(
            backend.list_members("list").expect("list_members"),
            vec!["b"]
        );
    }

    #[test]
    fn remove_list_drops_all_members() {
        let (backend, _temp_dir) = create_test_backend();
        backend.append_member("list", "a").expect("append");
        assert!(backend.remove_list("list").expect("remove_list"));
        assert!(backend
            .list_members("list")
            .expect("list_members")
            .is_empty());
        // Absent list removal is a success.
        assert!(backend.remove_list("list").expect("remove_list"));
    }

    #[test]
    fn entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend =
                LmdbBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
            backend
                .store("persistent", &json!("still here"), &TagSet::new(), None)
                .expect("store should succeed");
        }

        let backend =
            LmdbBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        let snapshot = backend.fetch("persistent").expect("fetch should succeed");
        assert!(snapshot.is_hit);
        assert_eq!(snapshot.value, Some(json!("still here")));
    }
}
