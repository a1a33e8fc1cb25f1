//! Pool configuration.

use std::time::Duration;

/// Configuration for a [`CachePool`](crate::CachePool).
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// TTL applied to saved items that carry no expiration of their own.
    ///
    /// `None` (the default) stores such items without expiration.
    pub default_ttl: Option<Duration>,
}

impl PoolConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TTL for items saved without an expiration.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }
}
