//! Stash Core - Cache Item and Error Taxonomy
//!
//! Pure data types for the stash cache pool: the cache item state machine,
//! cache key validation, and the error taxonomy shared by every layer.
//! No I/O happens in this crate; storage backends and the pool facade
//! build on top of it.

pub mod error;
pub mod item;
pub mod key;

pub use error::{BackendError, InvalidArgument, PoolError, PoolResult, Severity};
pub use item::{CacheItem, ItemLoader, ItemSnapshot};
pub use key::{validate_key, RESERVED_CHARACTERS};

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Tag set attached to a cache item.
///
/// A `BTreeSet` keeps tag iteration deterministic, which matters for
/// reproducible tag-index updates and for testability.
pub type TagSet = BTreeSet<String>;

/// Opaque item payload.
///
/// The pool never inspects values; backends serialize them as they see fit.
pub type Value = serde_json::Value;
