use crate::error::{ApiError, Result};

/// Validates configuration values for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ApiError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ApiError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the free-tier quota
    pub fn validate_quota(max_attempts: u32, window_seconds: u64) -> Result<()> {
        if max_attempts == 0 {
            return Err(ApiError::Configuration(
                "Maximum free attempts must be greater than 0".to_string(),
            ));
        }

        if window_seconds == 0 {
            return Err(ApiError::Configuration(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the Redis round-trip timeout
    pub fn validate_timeout(timeout_ms: u64) -> Result<()> {
        if timeout_ms == 0 {
            return Err(ApiError::Configuration(
                "Redis timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
