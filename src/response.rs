use crate::rate_limiter::StorageMode;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Free-tier quota left for the calling client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptsResponse {
    pub attempts_remaining: u32,
    /// Seconds until the quota resets, 0 when no window is open
    pub reset_time: u64,
    pub max_attempts: u32,
}

impl AttemptsResponse {
    pub fn new(attempts_remaining: u32, reset_time: u64, max_attempts: u32) -> Self {
        Self {
            attempts_remaining,
            reset_time,
            max_attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub storage: String,
}

impl HealthResponse {
    pub fn healthy(mode: StorageMode) -> Self {
        Self::with_status("healthy", mode)
    }

    /// Redis is configured but the service is running on local counters
    pub fn degraded(mode: StorageMode) -> Self {
        Self::with_status("degraded", mode)
    }

    fn with_status(status: &str, mode: StorageMode) -> Self {
        Self {
            status: status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage: match mode {
                StorageMode::Durable => "redis".to_string(),
                StorageMode::Fallback => "memory".to_string(),
            },
        }
    }
}
