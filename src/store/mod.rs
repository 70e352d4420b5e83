//! Attempt counter storage backends
//!
//! The attempt limiter keeps one counter per client key inside a fixed
//! window. Two interchangeable backends hold those counters:
//!
//! - [`RedisStore`]: shared across instances, expiry handled by key TTL
//! - [`MemoryStore`]: process-local table used when Redis is unreachable

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Quota applied to every client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            window: Duration::from_secs(86_400),
        }
    }
}

/// Snapshot of a live counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Attempts admitted in the current window.
    pub count: u32,
    /// Time left before the window closes.
    pub resets_in: Duration,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Counter backend used by the attempt limiter.
///
/// `admit` must be atomic per key: two concurrent calls may never both see
/// the last free slot.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Record one attempt for `key` if the quota allows it.
    async fn admit(&self, key: &str) -> Result<bool, StoreError>;

    /// Current usage for `key`, `None` if there is no live window.
    async fn usage(&self, key: &str) -> Result<Option<Usage>, StoreError>;

    /// Drop any counter for `key`.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
