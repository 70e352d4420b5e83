//! Free-tier attempt limiter.
//!
//! Counts admissions per client key inside a fixed window. Counters live in
//! Redis while it answers, and in a process-local table once it stops
//! answering. Callers always get a plain answer; store failures only change
//! which backend serves the call.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::store::{AttemptStore, MemoryStore, QuotaPolicy, RedisStore, StoreError, Usage};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which backend is currently answering admission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Durable,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub policy: QuotaPolicy,
    /// Upper bound on a single durable store round trip.
    pub store_timeout: Duration,
    /// How long to wait after a failure before probing the durable store
    /// again. `None` makes the downgrade permanent.
    pub reprobe_interval: Option<Duration>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            policy: QuotaPolicy::default(),
            store_timeout: Duration::from_millis(1000),
            reprobe_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl From<&Config> for LimiterSettings {
    fn from(config: &Config) -> Self {
        Self {
            policy: QuotaPolicy {
                max_attempts: config.max_free_attempts,
                window: Duration::from_secs(config.rate_limit_window),
            },
            store_timeout: Duration::from_millis(config.redis_timeout_ms),
            reprobe_interval: match config.redis_reprobe_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DurableHealth {
    Healthy,
    Lost { since: Instant },
}

pub struct RateLimiter {
    settings: LimiterSettings,
    durable: Option<Arc<dyn AttemptStore>>,
    health: Mutex<DurableHealth>,
    fallback: MemoryStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Limiter that never talks to an external store.
    pub fn in_memory(settings: LimiterSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            fallback: MemoryStore::new(settings.policy, clock.clone()),
            durable: None,
            health: Mutex::new(DurableHealth::Lost { since: clock.now() }),
            settings,
            clock,
        }
    }

    /// Limiter backed by `store`, starting in fallback mode if the store does
    /// not answer a ping.
    pub async fn with_durable_store(
        settings: LimiterSettings,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut limiter = Self::in_memory(settings, clock);

        match limiter.guarded(store.ping()).await {
            Ok(()) => {
                info!(backend = store.name(), "Durable attempt store reachable");
                *limiter.health.lock() = DurableHealth::Healthy;
            }
            Err(err) => {
                warn!(
                    backend = store.name(),
                    error = %err,
                    "Durable attempt store unreachable at startup, using in-memory counters"
                );
            }
        }

        limiter.durable = Some(store);
        limiter
    }

    /// Build the limiter described by `config`. Never fails: a missing or
    /// unusable Redis URL yields a memory-only limiter.
    pub async fn connect(config: &Config) -> Self {
        let settings = LimiterSettings::from(config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let Some(redis_url) = config.redis_url.as_deref() else {
            info!("No Redis URL configured, attempt counters are process-local");
            return Self::in_memory(settings, clock);
        };

        match RedisStore::new(redis_url, &config.key_prefix, settings.policy) {
            Ok(store) => Self::with_durable_store(settings, Arc::new(store), clock).await,
            Err(err) => {
                warn!(error = %err, "Invalid Redis URL, attempt counters are process-local");
                Self::in_memory(settings, clock)
            }
        }
    }

    /// Admit one attempt for `client_key` if its quota allows it.
    pub async fn check_and_admit(&self, client_key: &str) -> bool {
        if let Some(store) = self.active_durable().await {
            match self.guarded(store.admit(client_key)).await {
                Ok(admitted) => {
                    debug!(client_key, admitted, backend = store.name(), "Admission decided");
                    return admitted;
                }
                Err(err) => self.mark_lost(store.as_ref(), "check_and_admit", &err),
            }
        }

        let admitted = self.fallback.try_admit(client_key).await;
        debug!(client_key, admitted, backend = "memory", "Admission decided");
        admitted
    }

    /// Remaining attempts and seconds until the window resets. Never creates
    /// a record.
    pub async fn get_remaining(&self, client_key: &str) -> (u32, u64) {
        if let Some(store) = self.active_durable().await {
            match self.guarded(store.usage(client_key)).await {
                Ok(usage) => return self.summarize(usage),
                Err(err) => self.mark_lost(store.as_ref(), "get_remaining", &err),
            }
        }

        self.summarize(self.fallback.current_usage(client_key).await)
    }

    /// Forget all attempts recorded for `client_key`.
    pub async fn reset(&self, client_key: &str) {
        if let Some(store) = self.active_durable().await {
            if let Err(err) = self.guarded(store.remove(client_key)).await {
                self.mark_lost(store.as_ref(), "reset", &err);
            }
        }

        // Always cleared so a later downgrade cannot resurrect old counts
        self.fallback.forget(client_key).await;
    }

    /// Drop fallback records whose window has closed.
    pub async fn purge_expired(&self) -> usize {
        self.fallback.purge_expired().await
    }

    pub fn storage_mode(&self) -> StorageMode {
        match (&self.durable, *self.health.lock()) {
            (Some(_), DurableHealth::Healthy) => StorageMode::Durable,
            _ => StorageMode::Fallback,
        }
    }

    pub fn has_durable_store(&self) -> bool {
        self.durable.is_some()
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.policy.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.settings.policy.window
    }

    fn summarize(&self, usage: Option<Usage>) -> (u32, u64) {
        let max_attempts = self.settings.policy.max_attempts;

        match usage {
            None => (max_attempts, 0),
            Some(usage) => (
                max_attempts.saturating_sub(usage.count),
                ceil_secs(usage.resets_in),
            ),
        }
    }

    /// The durable store if it should serve this call, probing it first when
    /// it has been down for at least the reprobe interval.
    async fn active_durable(&self) -> Option<&Arc<dyn AttemptStore>> {
        let store = self.durable.as_ref()?;
        let now = self.clock.now();

        let probe_due = {
            let mut health = self.health.lock();
            match (*health, self.settings.reprobe_interval) {
                (DurableHealth::Healthy, _) => return Some(store),
                (DurableHealth::Lost { since }, Some(interval))
                    if now.saturating_duration_since(since) >= interval =>
                {
                    // Claim this probe so concurrent callers skip it
                    *health = DurableHealth::Lost { since: now };
                    true
                }
                _ => false,
            }
        };

        if !probe_due {
            return None;
        }

        match self.guarded(store.ping()).await {
            Ok(()) => {
                info!(backend = store.name(), "Durable attempt store recovered");
                *self.health.lock() = DurableHealth::Healthy;
                Some(store)
            }
            Err(err) => {
                debug!(backend = store.name(), error = %err, "Durable attempt store still unreachable");
                None
            }
        }
    }

    fn mark_lost(&self, store: &dyn AttemptStore, operation: &'static str, err: &StoreError) {
        let mut health = self.health.lock();

        if let DurableHealth::Healthy = *health {
            warn!(
                backend = store.name(),
                operation,
                error = %err,
                "Durable attempt store failed, falling back to in-memory counters"
            );
        }

        *health = DurableHealth::Lost {
            since: self.clock.now(),
        };
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.settings.store_timeout;

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
