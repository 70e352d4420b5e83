use crate::config_validator::ConfigValidator;
use crate::error::Result;
use clap::Parser;
use std::net::SocketAddr;

#[derive(Debug, Clone, Parser)]
#[command(name = "resume-gate", version, about = "Free-tier resume analysis API")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; counters stay in memory when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Free analyses allowed per client and window
    #[arg(long, env = "MAX_FREE_ATTEMPTS", default_value_t = 3)]
    pub max_free_attempts: u32,

    /// Window length in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 86_400)]
    pub rate_limit_window: u64,

    /// Namespace for attempt counters in Redis
    #[arg(long, env = "RATE_LIMIT_KEY_PREFIX", default_value = "free_resume_attempts")]
    pub key_prefix: String,

    /// Timeout for a single Redis round trip, in milliseconds
    #[arg(long, env = "REDIS_TIMEOUT_MS", default_value_t = 1000)]
    pub redis_timeout_ms: u64,

    /// Seconds between Redis probes after a failure; 0 never probes again
    #[arg(long, env = "REDIS_REPROBE_SECS", default_value_t = 60)]
    pub redis_reprobe_secs: u64,

    /// Expired in-memory counter cleanup interval in seconds
    #[arg(long, env = "CLEANUP_INTERVAL", default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_openai_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub azure_openai_api_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", default_value = "o3-mini")]
    pub azure_openai_deployment: String,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2024-12-01-preview")]
    pub azure_openai_api_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: None,
            max_free_attempts: 3,
            rate_limit_window: 86_400,
            key_prefix: "free_resume_attempts".to_string(),
            redis_timeout_ms: 1000,
            redis_reprobe_secs: 60,
            cleanup_interval_secs: 300,
            log_level: "info".to_string(),
            azure_openai_endpoint: None,
            azure_openai_api_key: None,
            azure_openai_deployment: "o3-mini".to_string(),
            azure_openai_api_version: "2024-12-01-preview".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from command-line flags and environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_quota(self.max_free_attempts, self.rate_limit_window)?;
        ConfigValidator::validate_timeout(self.redis_timeout_ms)?;
        if let Some(url) = &self.redis_url {
            ConfigValidator::validate_redis_url(url)?;
        }
        Ok(())
    }

    /// Azure OpenAI credentials, if both endpoint and key are set
    pub fn azure_credentials(&self) -> Option<(&str, &str)> {
        match (&self.azure_openai_endpoint, &self.azure_openai_api_key) {
            (Some(endpoint), Some(key)) if !endpoint.is_empty() && !key.is_empty() => {
                Some((endpoint.as_str(), key.as_str()))
            }
            _ => None,
        }
    }
}
