//! The cache pool facade.
//!
//! Composes the key validator, the deferred buffer, the tag index and a
//! storage backend into the public caching surface: item get/save/delete,
//! deferred writes with an explicit commit, and tag-based bulk
//! invalidation.
//!
//! Every failure crossing this boundary is routed through the translator:
//! callers see either [`PoolError::InvalidArgument`] or
//! [`PoolError::Operation`], never a raw backend error, and nothing is
//! swallowed. Dropping a pool performs a best-effort commit of whatever is
//! still buffered; failures during that implicit commit are logged and
//! discarded because no caller is left to report to.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use stash_core::{validate_key, CacheItem, ItemLoader, PoolResult, Value};
use stash_storage::StorageBackend;

use crate::config::PoolConfig;
use crate::deferred::DeferredBuffer;
use crate::tag_index::TagIndex;
use crate::translate;

/// Tag-aware caching pool over a pluggable storage backend.
///
/// The pool is single-threaded, synchronous state: the deferred buffer is
/// private and unshared, and the pool performs no internal locking. The
/// backend is assumed to provide at most per-operation atomicity, so two
/// pools (or processes) against the same backend may interleave; see the
/// tag-index module notes for the accepted consistency gap.
pub struct CachePool<B: StorageBackend> {
    backend: Arc<B>,
    tags: TagIndex<B>,
    config: PoolConfig,
    deferred: DeferredBuffer,
}

impl<B: StorageBackend> CachePool<B> {
    /// Create a pool with default configuration.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, PoolConfig::default())
    }

    /// Create a pool with the given configuration.
    pub fn with_config(backend: Arc<B>, config: PoolConfig) -> Self {
        Self {
            tags: TagIndex::new(Arc::clone(&backend)),
            backend,
            config,
            deferred: DeferredBuffer::new(),
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// A handle to the underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Item operations
    // ------------------------------------------------------------------

    /// Fetch the item for `key`.
    ///
    /// A key pending in the deferred buffer shadows the backend: the
    /// returned clone has its tags moved to `previous_tags`, so a later
    /// save against it diffs against what is already buffered rather than
    /// against backend state. Otherwise the item is lazy and issues the
    /// backend point-read on first access; backend failures are translated
    /// and re-raised there, never swallowed.
    pub fn get_item(&self, key: &str) -> PoolResult<CacheItem> {
        check_key(key)?;

        if let Some(pending) = self.deferred.get(key) {
            let mut clone = pending.clone();
            clone.move_tags_to_previous();
            return Ok(clone);
        }

        let backend = Arc::clone(&self.backend);
        let owned = key.to_string();
        let loader: ItemLoader = Arc::new(move || {
            backend
                .fetch(&owned)
                .map_err(|e| translate::backend_failure("get_item", e))
        });
        Ok(CacheItem::with_loader(key, loader))
    }

    /// Fetch one item per key, preserving input order.
    ///
    /// Every key is validated before any item is produced: the first bad
    /// key fails the whole batch.
    pub fn get_items<I, K>(&self, keys: I) -> PoolResult<Vec<CacheItem>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        for key in &keys {
            check_key(key)?;
        }
        keys.iter().map(|key| self.get_item(key)).collect()
    }

    /// Whether a usable (non-expired) value exists for `key`.
    pub fn has_item(&self, key: &str) -> PoolResult<bool> {
        let mut item = self.get_item(key)?;
        item.is_hit()
    }

    /// Drop the entire deferred buffer, then clear the whole backend.
    pub fn clear(&mut self) -> PoolResult<bool> {
        self.deferred.clear();
        self.backend
            .clear_all()
            .map_err(|e| translate::backend_failure("clear", e))
    }

    /// Delete a single item.
    pub fn delete_item(&mut self, key: &str) -> PoolResult<bool> {
        self.delete_items([key])
    }

    /// Delete every given item.
    ///
    /// Per key: the pending deferred entry is dropped, the remaining buffer
    /// is committed (so the tag index reflects the latest known state
    /// before membership removal), the key is removed from every tag list
    /// its persisted entry carries, and finally the backend point-delete
    /// runs. Returns true only if every delete succeeded; a false result
    /// for one key does not stop the remaining keys.
    pub fn delete_items<I, K>(&mut self, keys: I) -> PoolResult<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        for key in &keys {
            check_key(key)?;
        }

        let mut all_deleted = true;
        for key in &keys {
            self.deferred.remove(key);
            self.commit()?;

            let snapshot = self
                .backend
                .fetch(key)
                .map_err(|e| translate::backend_failure("delete_items", e))?;
            for tag in &snapshot.tags {
                self.tags
                    .remove(tag, key)
                    .map_err(|e| translate::backend_failure("delete_items", e))?;
            }

            all_deleted &= self
                .backend
                .remove(key)
                .map_err(|e| translate::backend_failure("delete_items", e))?;
        }
        Ok(all_deleted)
    }

    /// Persist an item.
    ///
    /// Tag-index deltas run first: the key is removed from every tag the
    /// persisted entry carried but the item no longer does, then appended
    /// to every current tag (idempotent). An expiration already in the
    /// past delegates to [`delete_item`](Self::delete_item) — a
    /// non-positive TTL is never written.
    pub fn save(&mut self, item: &mut CacheItem) -> PoolResult<bool> {
        check_key(item.key())?;
        let key = item.key().to_string();

        let previous = item.previous_tags()?.clone();
        let current = item.tags()?.clone();
        for tag in previous.difference(&current) {
            self.tags
                .remove(tag, &key)
                .map_err(|e| translate::backend_failure("save", e))?;
        }
        for tag in &current {
            self.tags
                .append(tag, &key)
                .map_err(|e| translate::backend_failure("save", e))?;
        }

        let ttl = match item.expiration()? {
            Some(at) => {
                let now = Utc::now();
                if at <= now {
                    return self.delete_item(&key);
                }
                Some((at - now).to_std().unwrap_or_default())
            }
            None => self.config.default_ttl,
        };

        let value = item.get()?.cloned().unwrap_or(Value::Null);
        let stored = self
            .backend
            .store(&key, &value, &current, ttl)
            .map_err(|e| translate::backend_failure("save", e))?;
        if stored {
            item.mark_saved();
        }
        Ok(stored)
    }

    /// Stage an item for a later [`commit`](Self::commit).
    ///
    /// Last write per key wins. Buffering cannot fail locally, so this
    /// always reports success.
    pub fn save_deferred(&mut self, item: CacheItem) -> bool {
        self.deferred.insert(item);
        true
    }

    /// Flush the deferred buffer.
    ///
    /// The buffer is drained up front and stays empty regardless of
    /// individual save outcomes. Returns true only if every buffered item
    /// saved successfully.
    pub fn commit(&mut self) -> PoolResult<bool> {
        let pending: Vec<CacheItem> = self.deferred.drain().collect();
        let mut all_saved = true;
        for mut item in pending {
            all_saved &= self.save(&mut item)?;
        }
        Ok(all_saved)
    }

    // ------------------------------------------------------------------
    // Tag invalidation
    // ------------------------------------------------------------------

    /// Invalidate every item tagged with `tag`.
    pub fn invalidate_tag(&mut self, tag: &str) -> PoolResult<bool> {
        self.invalidate_tags([tag])
    }

    /// Invalidate every item tagged with any of the given tags.
    ///
    /// Collects the union of member keys across the tags' lists and
    /// deletes those items. The tag lists themselves are removed only when
    /// that deletion reports overall success; on any failure they are left
    /// untouched so a retry finds the same members again.
    pub fn invalidate_tags<I, K>(&mut self, tags: I) -> PoolResult<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let tags: Vec<String> = tags.into_iter().map(|t| t.as_ref().to_string()).collect();

        let mut keys = BTreeSet::new();
        for tag in &tags {
            keys.extend(
                self.tags
                    .members(tag)
                    .map_err(|e| translate::backend_failure("invalidate_tags", e))?,
            );
        }

        let deleted = self.delete_items(keys)?;
        if deleted {
            for tag in &tags {
                self.tags
                    .drop_list(tag)
                    .map_err(|e| translate::backend_failure("invalidate_tags", e))?;
            }
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Value-oriented operations
    // ------------------------------------------------------------------

    /// The value stored for `key`, or `default` on a miss.
    pub fn get(&self, key: &str, default: Value) -> PoolResult<Value> {
        let mut item = self.get_item(key)?;
        Ok(item.get()?.cloned().unwrap_or(default))
    }

    /// Store `value` under `key`, optionally expiring after `ttl`.
    pub fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>) -> PoolResult<bool> {
        let mut item = self.get_item(key)?;
        item.set(value).expires_after(ttl);
        self.save(&mut item)
    }

    /// Delete the value stored for `key`.
    pub fn delete(&mut self, key: &str) -> PoolResult<bool> {
        self.delete_item(key)
    }

    /// The values for every given key, in input order; misses yield a
    /// clone of `default`.
    ///
    /// All backend reads happen here, eagerly; iterating the returned
    /// pairs is side-effect-free and restartable.
    pub fn get_multiple<I, K>(&self, keys: I, default: &Value) -> PoolResult<Vec<(String, Value)>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let items = self.get_items(keys)?;
        let mut pairs = Vec::with_capacity(items.len());
        for mut item in items {
            let value = item.get()?.cloned().unwrap_or_else(|| default.clone());
            pairs.push((item.key().to_string(), value));
        }
        Ok(pairs)
    }

    /// Store every key→value pair, optionally expiring after `ttl`.
    ///
    /// Every key is validated before any item is built; all items are
    /// deferred and flushed by one terminal [`commit`](Self::commit).
    pub fn set_multiple<I, K>(&mut self, pairs: I, ttl: Option<Duration>) -> PoolResult<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v))
            .collect();
        for (key, _) in &pairs {
            check_key(key)?;
        }

        for (key, value) in pairs {
            let mut item = self.get_item(&key)?;
            item.set(value).expires_after(ttl);
            self.save_deferred(item);
        }
        self.commit()
    }

    /// Delete every given key.
    pub fn delete_multiple<I, K>(&mut self, keys: I) -> PoolResult<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.delete_items(keys)
    }
}

impl<B: StorageBackend> Drop for CachePool<B> {
    /// Best-effort commit of buffered-but-uncommitted items.
    ///
    /// There is no caller left to report to, so failures are logged and
    /// discarded.
    fn drop(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        match self.commit() {
            Ok(true) => {}
            Ok(false) => tracing::warn!("implicit commit on teardown left unsaved items"),
            Err(err) => tracing::error!(error = %err, "implicit commit on teardown failed"),
        }
    }
}

fn check_key(key: &str) -> PoolResult<()> {
    validate_key(key).map_err(translate::invalid_argument)
}
