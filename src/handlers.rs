use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use validator::Validate;

use crate::analysis::{AnalysisBackend, AnalyzeRequest};
use crate::client_key::client_key;
use crate::error::{ApiError, Result};
use crate::rate_limiter::{RateLimiter, StorageMode};
use crate::response::{AttemptsResponse, HealthResponse};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Application state containing the attempt limiter and analysis backend
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    /// `None` when no model credentials are configured
    pub analyzer: Option<Arc<dyn AnalysisBackend>>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, analyzer: Option<Arc<dyn AnalysisBackend>>) -> SharedState {
        Arc::new(Self { limiter, analyzer })
    }
}

/// Analyze a resume on the free tier
pub async fn analyze_resume(
    State(state): State<SharedState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Response> {
    payload.validate()?;

    // Checked before admission so an outage does not burn attempts
    let analyzer = state
        .analyzer
        .as_ref()
        .ok_or(ApiError::AnalysisUnavailable)?;

    let key = client_key(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    if !state.limiter.check_and_admit(&key).await {
        let (_, reset_seconds) = state.limiter.get_remaining(&key).await;
        info!(client = %key, reset_seconds, "Free tier limit reached");
        return Err(ApiError::RateLimitExceeded {
            retry_after: reset_seconds,
        });
    }

    let report = analyzer.analyze(&payload).await.map_err(|e| {
        error!(client = %key, error = %e, "Resume analysis failed");
        ApiError::Analysis(e.to_string())
    })?;

    let (remaining, _) = state.limiter.get_remaining(&key).await;

    let mut resp = Json(report).into_response();
    resp.headers_mut().insert(
        "x-ratelimit-limit",
        HeaderValue::from(state.limiter.max_attempts()),
    );
    resp.headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from(remaining));

    Ok(resp)
}

/// Remaining free attempts for the calling client
pub async fn get_attempts(
    State(state): State<SharedState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let key = client_key(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let (remaining, reset_seconds) = state.limiter.get_remaining(&key).await;

    Json(AttemptsResponse::new(
        remaining,
        reset_seconds,
        state.limiter.max_attempts(),
    ))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let mode = state.limiter.storage_mode();

    let health = if state.limiter.has_durable_store() && mode == StorageMode::Fallback {
        HealthResponse::degraded(mode)
    } else {
        HealthResponse::healthy(mode)
    };

    Json(health)
}
