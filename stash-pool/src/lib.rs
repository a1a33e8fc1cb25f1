//! Stash Pool - Tag-Aware Caching Orchestration
//!
//! Sits above a pluggable key-value storage backend and adds what the
//! backend does not natively provide: structured cache items carrying a
//! value, an expiration and a set of tags; deferred/batched writes with an
//! explicit commit; and tag-based bulk invalidation via a tag→member-keys
//! index stored in the same backend.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stash_pool::CachePool;
//! use stash_storage::MemoryBackend;
//!
//! let mut pool = CachePool::new(Arc::new(MemoryBackend::new()));
//!
//! let mut item = pool.get_item("greeting")?;
//! item.set(serde_json::json!("hello")).set_tags(["greetings"])?;
//! pool.save(&mut item)?;
//!
//! pool.invalidate_tag("greetings")?;
//! assert!(!pool.has_item("greeting")?);
//! ```
//!
//! # Consistency
//!
//! The data write and the tag-index writes around it are separate backend
//! operations with no cross-operation atomicity; a crash between them
//! leaves the index inconsistent with the data. This is an accepted
//! property of the backend contract. Invalidation is deliberately
//! conservative about it: tag lists are only removed after every member
//! deletion succeeded, so a failed invalidation can be retried against the
//! same members.

pub mod config;
pub mod deferred;
pub mod pool;
pub mod tag_index;

mod translate;

pub use config::PoolConfig;
pub use deferred::DeferredBuffer;
pub use pool::CachePool;
pub use tag_index::{tag_list_key, TagIndex};

// Re-export the types callers interact with directly.
pub use stash_core::{
    validate_key, BackendError, CacheItem, InvalidArgument, ItemSnapshot, PoolError, PoolResult,
    Severity, TagSet, Timestamp, Value,
};
pub use stash_storage::{LmdbBackend, MemoryBackend, StorageBackend};
