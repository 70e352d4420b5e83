use super::{AttemptStore, QuotaPolicy, StoreError, Usage};
use crate::clock::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Attempt state for one client key
#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    count: u32,
    window_start: Instant,
}

impl AttemptRecord {
    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.elapsed(now) >= window
    }
}

/// In-process attempt table.
///
/// A single async mutex guards the whole table, so every read-modify-write
/// on a key is serialized with every other one.
pub struct MemoryStore {
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, AttemptRecord>>,
}

impl MemoryStore {
    pub fn new(policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn try_admit(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        if let Some(record) = records.get_mut(key) {
            if !record.is_expired(now, self.policy.window) {
                if record.count >= self.policy.max_attempts {
                    return false;
                }
                record.count += 1;
                return true;
            }
        }

        // Absent or expired: start a new window
        records.insert(
            key.to_string(),
            AttemptRecord {
                count: 1,
                window_start: now,
            },
        );
        true
    }

    pub async fn current_usage(&self, key: &str) -> Option<Usage> {
        let now = self.clock.now();
        let records = self.records.lock().await;

        let record = records.get(key)?;
        if record.is_expired(now, self.policy.window) {
            return None;
        }

        Some(Usage {
            count: record.count,
            resets_in: self.policy.window.saturating_sub(record.elapsed(now)),
        })
    }

    pub async fn forget(&self, key: &str) {
        self.records.lock().await.remove(key);
    }

    /// Remove records whose window has closed. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.policy.window;
        let mut records = self.records.lock().await;

        let initial_count = records.len();
        records.retain(|_, record| !record.is_expired(now, window));
        initial_count - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn admit(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.try_admit(key).await)
    }

    async fn usage(&self, key: &str) -> Result<Option<Usage>, StoreError> {
        Ok(self.current_usage(key).await)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.forget(key).await;
        Ok(())
    }
}
