use super::{AttemptStore, QuotaPolicy, StoreError, Usage};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Reads the counter and either creates it with an expiry, increments it,
/// or refuses, all in one server-side step. INCR keeps the existing TTL, so
/// the window stays anchored at the first attempt.
const ADMIT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], 1, 'EX', ARGV[2])
    return 1
end
if tonumber(current) >= tonumber(ARGV[1]) then
    return 0
end
redis.call('INCR', KEYS[1])
return 1
"#;

/// Redis-backed attempt counters.
///
/// Keys are namespaced as `{prefix}:{client_key}`. The connection is opened
/// lazily and dropped after any failed command so the next call reconnects.
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    policy: QuotaPolicy,
}

impl RedisStore {
    pub fn new(redis_url: &str, key_prefix: &str, policy: QuotaPolicy) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            key_prefix: key_prefix.to_string(),
            policy,
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut connection_guard = self.connection.lock().await;

        if let Some(ref conn) = *connection_guard {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        debug!(target: "resume_gate::store", "Opened Redis connection");
        *connection_guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection after a failure.
    async fn discard_connection<T>(&self, result: Result<T, redis::RedisError>) -> Result<T, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.connection.lock().await.take();
                Err(StoreError::Redis(err))
            }
        }
    }
}

#[async_trait]
impl AttemptStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING").query_async::<_, String>(&mut conn).await;
        self.discard_connection(result).await.map(|_| ())
    }

    async fn admit(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let window_secs = self.policy.window.as_secs().max(1);

        let result = redis::cmd("EVAL")
            .arg(ADMIT_SCRIPT)
            .arg(1)
            .arg(self.redis_key(key))
            .arg(self.policy.max_attempts)
            .arg(window_secs)
            .query_async::<_, i64>(&mut conn)
            .await;

        self.discard_connection(result).await.map(|admitted| admitted == 1)
    }

    async fn usage(&self, key: &str) -> Result<Option<Usage>, StoreError> {
        let mut conn = self.connection().await?;
        let redis_key = self.redis_key(key);

        let result = redis::pipe()
            .cmd("GET")
            .arg(&redis_key)
            .cmd("PTTL")
            .arg(&redis_key)
            .query_async::<_, (Option<u32>, i64)>(&mut conn)
            .await;

        let (count, pttl) = self.discard_connection(result).await?;
        Ok(usage_from_reply(count, pttl))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async::<_, i64>(&mut conn)
            .await;

        self.discard_connection(result).await.map(|_| ())
    }
}

/// Millisecond precision so the last second of a window is not reported as 0.
/// PTTL is -2 for a missing key and -1 for a key without expiry.
fn usage_from_reply(count: Option<u32>, pttl: i64) -> Option<Usage> {
    count.map(|count| Usage {
        count,
        resets_in: Duration::from_millis(pttl.max(0) as u64),
    })
}
