use async_trait::async_trait;
use resume_gate::clock::ManualClock;
use resume_gate::store::{AttemptStore, MemoryStore, QuotaPolicy, StoreError, Usage};
use resume_gate::{Config, LimiterSettings, RateLimiter, StorageMode};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Durable store stand-in that can be switched off mid-test
struct ScriptedStore {
    inner: MemoryStore,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedStore {
    fn new(policy: QuotaPolicy, clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(policy, clock),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for ScriptedStore {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn admit(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.admit(key).await
    }

    async fn usage(&self, key: &str) -> Result<Option<Usage>, StoreError> {
        self.check()?;
        self.inner.usage(key).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }
}

/// Answers pings but hangs on every counter operation
struct HangingStore;

#[async_trait]
impl AttemptStore for HangingStore {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn admit(&self, _key: &str) -> Result<bool, StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }

    async fn usage(&self, _key: &str) -> Result<Option<Usage>, StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

fn settings(max_attempts: u32, window_secs: u64) -> LimiterSettings {
    LimiterSettings {
        policy: QuotaPolicy {
            max_attempts,
            window: Duration::from_secs(window_secs),
        },
        store_timeout: Duration::from_millis(200),
        reprobe_interval: None,
    }
}

fn memory_limiter(max_attempts: u32, window_secs: u64) -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let limiter = RateLimiter::in_memory(settings(max_attempts, window_secs), clock.clone());
    (limiter, clock)
}

async fn durable_limiter(
    settings: LimiterSettings,
) -> (RateLimiter, Arc<ScriptedStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let store = ScriptedStore::new(settings.policy, clock.clone());
    let limiter = RateLimiter::with_durable_store(settings, store.clone(), clock.clone()).await;
    (limiter, store, clock)
}

#[tokio::test]
async fn test_admit_admit_admit_deny_deny() {
    let (limiter, _clock) = memory_limiter(3, 60);

    let decisions = [
        limiter.check_and_admit("A").await,
        limiter.check_and_admit("A").await,
        limiter.check_and_admit("A").await,
        limiter.check_and_admit("A").await,
        limiter.check_and_admit("A").await,
    ];
    assert_eq!(decisions, [true, true, true, false, false]);

    let (remaining, reset_seconds) = limiter.get_remaining("A").await;
    assert_eq!(remaining, 0);
    assert!(reset_seconds > 0 && reset_seconds <= 60);
}

#[tokio::test]
async fn test_durable_store_sequence_matches_memory() {
    let (limiter, store, _clock) = durable_limiter(settings(3, 60)).await;
    assert_eq!(limiter.storage_mode(), StorageMode::Durable);

    for _ in 0..3 {
        assert!(limiter.check_and_admit("A").await);
    }
    assert!(!limiter.check_and_admit("A").await);

    let (remaining, reset_seconds) = limiter.get_remaining("A").await;
    assert_eq!(remaining, 0);
    assert!(reset_seconds > 0 && reset_seconds <= 60);
    assert!(store.calls() >= 5);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let (limiter, _clock) = memory_limiter(1, 60);

    assert!(limiter.check_and_admit("10.0.0.1").await);
    assert!(!limiter.check_and_admit("10.0.0.1").await);
    assert!(limiter.check_and_admit("10.0.0.2").await);
    assert_eq!(limiter.get_remaining("10.0.0.3").await, (1, 0));
}

#[tokio::test]
async fn test_window_expiry_resets_quota() {
    let (limiter, clock) = memory_limiter(2, 60);

    assert!(limiter.check_and_admit("A").await);
    clock.advance(Duration::from_secs(30));
    assert!(limiter.check_and_admit("A").await);
    assert!(!limiter.check_and_admit("A").await);

    // Window is anchored at the first admission, not the latest
    let (remaining, reset_seconds) = limiter.get_remaining("A").await;
    assert_eq!((remaining, reset_seconds), (0, 30));

    clock.advance(Duration::from_secs(31));
    assert_eq!(limiter.get_remaining("A").await, (2, 0));

    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.get_remaining("A").await, (1, 60));
}

#[tokio::test]
async fn test_get_remaining_does_not_create_records() {
    let (limiter, store, _clock) = durable_limiter(settings(3, 60)).await;

    assert_eq!(limiter.get_remaining("ghost").await, (3, 0));
    assert_eq!(limiter.get_remaining("ghost").await, (3, 0));
    assert!(store.inner.is_empty().await);

    let (memory_only, _clock) = memory_limiter(3, 60);
    assert_eq!(memory_only.get_remaining("ghost").await, (3, 0));
    assert_eq!(memory_only.purge_expired().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_never_exceed_quota() {
    let (limiter, _clock) = memory_limiter(3, 60);
    let limiter = Arc::new(limiter);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_and_admit("burst").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(limiter.get_remaining("burst").await.0, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_against_durable_store() {
    let (limiter, _store, _clock) = durable_limiter(settings(5, 60)).await;
    let limiter = Arc::new(limiter);

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_and_admit("burst").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_fallback_starts_from_empty_table() {
    let (limiter, store, _clock) = durable_limiter(settings(2, 60)).await;

    assert!(limiter.check_and_admit("A").await);
    assert!(limiter.check_and_admit("A").await);

    store.set_down(true);

    // The fallback table never saw "A", so the quota starts over
    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);

    assert!(limiter.check_and_admit("A").await);
    assert!(!limiter.check_and_admit("A").await);
    assert_eq!(limiter.get_remaining("A").await.0, 0);
}

#[tokio::test]
async fn test_downgrade_is_permanent_without_reprobe() {
    let (limiter, store, clock) = durable_limiter(settings(3, 60)).await;

    store.set_down(true);
    assert!(limiter.check_and_admit("A").await);
    let calls_after_failure = store.calls();

    store.set_down(false);
    clock.advance(Duration::from_secs(3600));

    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert_eq!(store.calls(), calls_after_failure);
}

#[tokio::test]
async fn test_reprobe_returns_to_durable_store() {
    let mut config = settings(2, 3600);
    config.reprobe_interval = Some(Duration::from_secs(30));
    let (limiter, store, clock) = durable_limiter(config).await;

    assert!(limiter.check_and_admit("A").await);
    assert!(limiter.check_and_admit("A").await);

    store.set_down(true);
    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);

    // Too early to probe again
    store.set_down(false);
    clock.advance(Duration::from_secs(10));
    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);

    // Durable store still holds two attempts for "A"
    clock.advance(Duration::from_secs(25));
    assert!(!limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Durable);
}

#[tokio::test]
async fn test_failed_reprobe_stays_on_fallback() {
    let mut config = settings(3, 3600);
    config.reprobe_interval = Some(Duration::from_secs(30));
    let (limiter, store, clock) = durable_limiter(config).await;

    store.set_down(true);
    assert!(limiter.check_and_admit("A").await);

    clock.advance(Duration::from_secs(31));
    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert_eq!(limiter.get_remaining("A").await.0, 1);
}

#[tokio::test]
async fn test_unreachable_store_at_startup_degrades() {
    let clock = Arc::new(ManualClock::new());
    let policy = settings(3, 60).policy;
    let store = ScriptedStore::new(policy, clock.clone());
    store.set_down(true);

    let limiter = RateLimiter::with_durable_store(settings(3, 60), store.clone(), clock).await;

    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert!(limiter.has_durable_store());
    assert!(limiter.check_and_admit("A").await);
    assert_eq!(limiter.get_remaining("A").await, (2, 60));
}

#[tokio::test]
async fn test_slow_store_times_out_into_fallback() {
    let limiter = RateLimiter::with_durable_store(
        settings(3, 60),
        Arc::new(HangingStore),
        Arc::new(ManualClock::new()),
    )
    .await;
    assert_eq!(limiter.storage_mode(), StorageMode::Durable);

    let admitted = tokio::time::timeout(Duration::from_secs(5), limiter.check_and_admit("A"))
        .await
        .expect("admission must not wait on a hung store");

    assert!(admitted);
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert_eq!(limiter.get_remaining("A").await, (2, 60));
}

#[tokio::test]
async fn test_reset_unknown_key_is_noop() {
    let (limiter, _clock) = memory_limiter(3, 60);
    limiter.reset("never-seen").await;
    assert_eq!(limiter.get_remaining("never-seen").await, (3, 0));

    let (durable, _store, _clock) = durable_limiter(settings(3, 60)).await;
    durable.reset("never-seen").await;
    assert_eq!(durable.get_remaining("never-seen").await, (3, 0));
}

#[tokio::test]
async fn test_reset_restores_full_quota() {
    let (limiter, _store, _clock) = durable_limiter(settings(2, 60)).await;

    assert!(limiter.check_and_admit("A").await);
    assert!(limiter.check_and_admit("A").await);
    assert!(!limiter.check_and_admit("A").await);

    limiter.reset("A").await;
    assert_eq!(limiter.get_remaining("A").await, (2, 0));
    assert!(limiter.check_and_admit("A").await);
}

#[tokio::test]
async fn test_reset_clears_fallback_while_durable() {
    let mut config = settings(1, 3600);
    config.reprobe_interval = Some(Duration::from_secs(30));
    let (limiter, store, clock) = durable_limiter(config).await;

    // Exhaust "A" in the fallback table
    store.set_down(true);
    assert!(limiter.check_and_admit("A").await);
    assert!(!limiter.check_and_admit("A").await);

    // Recover, reset while durable, then lose the store again
    store.set_down(false);
    clock.advance(Duration::from_secs(31));
    limiter.reset("A").await;
    assert_eq!(limiter.storage_mode(), StorageMode::Durable);

    store.set_down(true);
    assert!(limiter.check_and_admit("A").await);
}

#[tokio::test]
async fn test_store_failure_during_remaining_and_reset() {
    let (limiter, store, _clock) = durable_limiter(settings(3, 60)).await;
    store.set_down(true);

    assert_eq!(limiter.get_remaining("A").await, (3, 0));
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    limiter.reset("A").await;
}

#[tokio::test]
async fn test_empty_client_key_is_accepted() {
    let (limiter, _clock) = memory_limiter(1, 60);

    assert!(limiter.check_and_admit("").await);
    assert!(!limiter.check_and_admit("").await);
    limiter.reset("").await;
    assert_eq!(limiter.get_remaining("").await, (1, 0));
}

#[tokio::test]
async fn test_purge_expired_fallback_records() {
    let (limiter, clock) = memory_limiter(3, 60);

    limiter.check_and_admit("A").await;
    limiter.check_and_admit("B").await;
    clock.advance(Duration::from_secs(61));
    limiter.check_and_admit("C").await;

    assert_eq!(limiter.purge_expired().await, 2);
    assert_eq!(limiter.get_remaining("C").await.0, 2);
}

#[tokio::test]
async fn test_connect_without_redis_is_memory_only() {
    let limiter = RateLimiter::connect(&Config::default()).await;

    assert!(!limiter.has_durable_store());
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert_eq!(limiter.max_attempts(), 3);
    assert_eq!(limiter.window(), Duration::from_secs(86_400));
}

#[tokio::test]
async fn test_connect_to_unreachable_redis_degrades() {
    let config = Config {
        redis_url: Some("redis://127.0.0.1:1".to_string()),
        redis_timeout_ms: 300,
        ..Config::default()
    };

    let limiter = RateLimiter::connect(&config).await;

    assert!(limiter.has_durable_store());
    assert_eq!(limiter.storage_mode(), StorageMode::Fallback);
    assert!(limiter.check_and_admit("203.0.113.5").await);
    assert_eq!(limiter.get_remaining("203.0.113.5").await.0, 2);
}
