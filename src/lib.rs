pub mod analysis;
pub mod client_key;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{ApiError, Result};
pub use rate_limiter::{LimiterSettings, RateLimiter, StorageMode};
pub use server::create_app;
