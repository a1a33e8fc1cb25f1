//! The cache item: one entry of value, hit state, expiration and tags.
//!
//! Items are two-phase: a pool hands out items carrying a loader closure
//! that performs the backend point-read, and the loader runs at most once,
//! on first access, with its result memoized. Mutations made before the
//! first access (an explicit `set`, replaced tags, an explicit expiration)
//! are never clobbered by a later load.
//!
//! `previous_tags` records the tags the persisted entry carried before the
//! current mutation. It is set once, from backend state (or moved from the
//! current tags when a pending deferred item is read back), and is copied
//! forward on clone rather than recomputed. The pool diffs `previous_tags`
//! against `tags` on save to reconcile tag-index membership.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::PoolResult;
use crate::key::validate_key;
use crate::{TagSet, Timestamp, Value};

/// Persisted state of one cache entry, as reported by a backend point-read.
///
/// A miss is `is_hit == false` with no value, no tags and no expiration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSnapshot {
    /// Whether the entry exists (and is not expired) in the backend.
    pub is_hit: bool,
    /// The stored payload, present only on a hit.
    pub value: Option<Value>,
    /// Tags the stored entry carries.
    pub tags: TagSet,
    /// Absolute expiration, absent means "no expiration".
    pub expiration: Option<Timestamp>,
}

impl ItemSnapshot {
    /// Snapshot of a missing entry.
    pub fn miss() -> Self {
        Self::default()
    }

    /// Snapshot of a stored entry.
    pub fn hit(value: Value, tags: TagSet, expiration: Option<Timestamp>) -> Self {
        Self {
            is_hit: true,
            value: Some(value),
            tags,
            expiration,
        }
    }
}

/// Deferred point-read, invoked at most once (memoized thunk).
pub type ItemLoader = Arc<dyn Fn() -> PoolResult<ItemSnapshot> + Send + Sync>;

/// A single cache entry.
///
/// The key is immutable after construction. Everything else is mutated
/// through setters by the owner of the item before handing it back to the
/// pool via `save`/`save_deferred`.
#[derive(Clone)]
pub struct CacheItem {
    key: String,
    /// Pending lazy load; cleared after the first successful invocation.
    loader: Option<ItemLoader>,
    value: Option<Value>,
    has_value: bool,
    tags: TagSet,
    /// Set once `set_tags` replaced the tag set; a later load must not
    /// overwrite the replacement.
    tags_replaced: bool,
    previous_tags: TagSet,
    /// Set once `previous_tags` has been established; it is copied forward
    /// from then on, never recomputed.
    previous_tags_pinned: bool,
    expiration: Option<Timestamp>,
    expiration_set: bool,
}

impl CacheItem {
    /// Create a brand-new item with no persisted state behind it.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            loader: None,
            value: None,
            has_value: false,
            tags: TagSet::new(),
            tags_replaced: false,
            previous_tags: TagSet::new(),
            previous_tags_pinned: false,
            expiration: None,
            expiration_set: false,
        }
    }

    /// Create a lazy item whose persisted state is produced by `loader`
    /// on first access.
    pub fn with_loader(key: impl Into<String>, loader: ItemLoader) -> Self {
        let mut item = Self::new(key);
        item.loader = Some(loader);
        item
    }

    /// Create an item from an already-fetched snapshot.
    pub fn from_snapshot(key: impl Into<String>, snapshot: ItemSnapshot) -> Self {
        let mut item = Self::new(key);
        item.apply_snapshot(snapshot);
        item
    }

    /// The item's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value, present only when the item is a hit.
    ///
    /// Runs the pending load, if any; backend failures are re-raised here.
    pub fn get(&mut self) -> PoolResult<Option<&Value>> {
        self.initialize()?;
        if self.hit_now() {
            Ok(self.value.as_ref())
        } else {
            Ok(None)
        }
    }

    /// True once a value has been loaded or explicitly set, and the
    /// expiration (if any) has not passed.
    pub fn is_hit(&mut self) -> PoolResult<bool> {
        self.initialize()?;
        Ok(self.hit_now())
    }

    /// Set the value, marking the item as a hit.
    pub fn set(&mut self, value: Value) -> &mut Self {
        self.value = Some(value);
        self.has_value = true;
        self
    }

    /// Tags currently assigned to this item.
    pub fn tags(&mut self) -> PoolResult<&TagSet> {
        self.initialize()?;
        Ok(&self.tags)
    }

    /// Replace the current tag set.
    ///
    /// Tag names obey the same rules as cache keys.
    ///
    /// # Errors
    ///
    /// Raises [`InvalidArgument`](crate::InvalidArgument) for a malformed
    /// tag name; the tag set is left untouched in that case.
    pub fn set_tags<I, T>(&mut self, tags: I) -> PoolResult<&mut Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut replacement = TagSet::new();
        for tag in tags {
            let tag = tag.into();
            validate_key(&tag)?;
            replacement.insert(tag);
        }
        self.tags = replacement;
        self.tags_replaced = true;
        Ok(self)
    }

    /// The tags the persisted entry carried before the current mutation.
    pub fn previous_tags(&mut self) -> PoolResult<&TagSet> {
        self.initialize()?;
        Ok(&self.previous_tags)
    }

    /// The absolute expiration, absent means "no expiration".
    pub fn expiration(&mut self) -> PoolResult<Option<Timestamp>> {
        self.initialize()?;
        Ok(self.expiration)
    }

    /// Set an absolute expiration; `None` means "no expiration".
    pub fn expires_at(&mut self, at: Option<Timestamp>) -> &mut Self {
        self.expiration = at;
        self.expiration_set = true;
        self
    }

    /// Set the expiration relative to now; `None` means "no expiration".
    pub fn expires_after(&mut self, ttl: Option<Duration>) -> &mut Self {
        let at = ttl.and_then(|d| {
            let delta = chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX);
            // An overflowing expiration is indistinguishable from "never".
            Utc::now().checked_add_signed(delta)
        });
        self.expires_at(at)
    }

    /// Record that this item has been persisted: the current tags become
    /// the previous tags for the next mutation cycle.
    pub fn mark_saved(&mut self) {
        self.previous_tags = self.tags.clone();
        self.previous_tags_pinned = true;
    }

    /// Move the current tags into `previous_tags`, leaving the current set
    /// empty.
    ///
    /// Used when a pending deferred item is read back before commit: the
    /// clone handed to the caller must diff a later save against what is
    /// already buffered, not against backend state.
    pub fn move_tags_to_previous(&mut self) {
        self.previous_tags = mem::take(&mut self.tags);
        self.previous_tags_pinned = true;
        self.tags_replaced = true;
    }

    /// Whether a load is still pending.
    pub fn is_lazy(&self) -> bool {
        self.loader.is_some()
    }

    /// Run the pending loader, memoizing its result.
    ///
    /// The loader is invoked at most once successfully; a failed load is
    /// re-raised and may be retried by a later access.
    fn initialize(&mut self) -> PoolResult<()> {
        let loader = match &self.loader {
            Some(loader) => Arc::clone(loader),
            None => return Ok(()),
        };
        let snapshot = loader()?;
        self.loader = None;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: ItemSnapshot) {
        if !self.has_value {
            self.value = snapshot.value;
            self.has_value = snapshot.is_hit;
        }
        if !self.tags_replaced {
            self.tags = snapshot.tags.clone();
        }
        if !self.previous_tags_pinned {
            self.previous_tags = snapshot.tags;
            self.previous_tags_pinned = true;
        }
        if !self.expiration_set {
            self.expiration = snapshot.expiration;
        }
    }

    fn hit_now(&self) -> bool {
        self.has_value
            && match self.expiration {
                None => true,
                Some(at) => at > Utc::now(),
            }
    }
}

impl fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("has_value", &self.has_value)
            .field("tags", &self.tags)
            .field("previous_tags", &self.previous_tags)
            .field("expiration", &self.expiration)
            .field("lazy", &self.loader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, InvalidArgument, PoolError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(
        snapshot: ItemSnapshot,
        calls: Arc<AtomicUsize>,
    ) -> ItemLoader {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot.clone())
        })
    }

    fn tags(names: &[&str]) -> TagSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_item_is_a_miss() {
        let mut item = CacheItem::new("k");
        assert!(!item.is_hit().unwrap());
        assert_eq!(item.get().unwrap(), None);
    }

    #[test]
    fn set_marks_hit() {
        let mut item = CacheItem::new("k");
        item.set(json!(42));
        assert!(item.is_hit().unwrap());
        assert_eq!(item.get().unwrap(), Some(&json!(42)));
    }

    #[test]
    fn loader_runs_once_and_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let snapshot = ItemSnapshot::hit(json!("v"), tags(&["t"]), None);
        let mut item = CacheItem::with_loader("k", counting_loader(snapshot, Arc::clone(&calls)));

        assert!(item.is_lazy());
        assert!(item.is_hit().unwrap());
        assert_eq!(item.get().unwrap(), Some(&json!("v")));
        assert_eq!(item.tags().unwrap(), &tags(&["t"]));
        assert_eq!(item.previous_tags().unwrap(), &tags(&["t"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!item.is_lazy());
    }

    #[test]
    fn loader_failure_is_reraised_and_retriable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let loader: ItemLoader = Arc::new(move || {
            if calls2.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PoolError::operation(
                    "get_item",
                    BackendError::Other("transient".into()),
                ))
            } else {
                Ok(ItemSnapshot::hit(json!(1), TagSet::new(), None))
            }
        });

        let mut item = CacheItem::with_loader("k", loader);
        assert!(item.is_hit().is_err());
        assert!(item.is_hit().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn explicit_set_survives_late_load() {
        let snapshot = ItemSnapshot::hit(json!("stored"), tags(&["a"]), None);
        let mut item =
            CacheItem::with_loader("k", counting_loader(snapshot, Arc::new(AtomicUsize::new(0))));

        item.set(json!("fresh"));
        // previous_tags still comes from the persisted state.
        assert_eq!(item.previous_tags().unwrap(), &tags(&["a"]));
        assert_eq!(item.get().unwrap(), Some(&json!("fresh")));
    }

    #[test]
    fn replaced_tags_survive_late_load() {
        let snapshot = ItemSnapshot::hit(json!(0), tags(&["old"]), None);
        let mut item =
            CacheItem::with_loader("k", counting_loader(snapshot, Arc::new(AtomicUsize::new(0))));

        item.set_tags(["new"]).unwrap();
        assert_eq!(item.tags().unwrap(), &tags(&["new"]));
        assert_eq!(item.previous_tags().unwrap(), &tags(&["old"]));
    }

    #[test]
    fn set_tags_validates_tag_names() {
        let mut item = CacheItem::new("k");
        let err = item.set_tags(["ok", "bad:tag"]).unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidArgument(InvalidArgument::ReservedCharacter { .. })
        ));
        // The tag set is untouched on failure.
        assert!(item.tags().unwrap().is_empty());
    }

    #[test]
    fn move_tags_to_previous_empties_current() {
        let mut item = CacheItem::new("k");
        item.set_tags(["a", "b"]).unwrap();
        item.move_tags_to_previous();

        assert!(item.tags().unwrap().is_empty());
        assert_eq!(item.previous_tags().unwrap(), &tags(&["a", "b"]));
    }

    #[test]
    fn previous_tags_copied_forward_on_clone() {
        let mut item = CacheItem::new("k");
        item.set_tags(["a"]).unwrap();
        item.mark_saved();

        let mut clone = item.clone();
        clone.set_tags(["b"]).unwrap();
        assert_eq!(clone.previous_tags().unwrap(), &tags(&["a"]));
    }

    #[test]
    fn mark_saved_resets_previous_tags() {
        let mut item = CacheItem::new("k");
        item.set_tags(["x", "y"]).unwrap();
        item.mark_saved();
        assert_eq!(item.previous_tags().unwrap(), &tags(&["x", "y"]));
    }

    #[test]
    fn past_expiration_means_miss() {
        let mut item = CacheItem::new("k");
        item.set(json!(1))
            .expires_at(Some(Utc::now() - chrono::TimeDelta::seconds(1)));
        assert!(!item.is_hit().unwrap());
        assert_eq!(item.get().unwrap(), None);
    }

    #[test]
    fn future_expiration_still_hit() {
        let mut item = CacheItem::new("k");
        item.set(json!(1)).expires_after(Some(Duration::from_secs(3600)));
        assert!(item.is_hit().unwrap());
        assert!(item.expiration().unwrap().is_some());
    }

    #[test]
    fn expires_after_none_clears_expiration() {
        let mut item = CacheItem::new("k");
        item.set(json!(1))
            .expires_after(Some(Duration::from_secs(1)))
            .expires_after(None);
        assert_eq!(item.expiration().unwrap(), None);
    }

    #[test]
    fn explicit_expiration_survives_late_load() {
        let stored_expiry = Utc::now() + chrono::TimeDelta::seconds(30);
        let snapshot = ItemSnapshot::hit(json!(1), TagSet::new(), Some(stored_expiry));
        let mut item =
            CacheItem::with_loader("k", counting_loader(snapshot, Arc::new(AtomicUsize::new(0))));

        item.expires_at(None);
        assert_eq!(item.expiration().unwrap(), None);
    }
}
