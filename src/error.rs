use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Free tier limit exceeded. Please upgrade to continue optimizing resumes.")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Error processing resume: {0}")]
    Analysis(String),

    #[error("Resume analysis is not available")]
    AnalysisUnavailable,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::RateLimitExceeded { .. } => Self::new("rate_limit_exceeded", &message, 429),
            ApiError::Analysis(_) => Self::new("analysis_failed", &message, 500),
            ApiError::AnalysisUnavailable => Self::new("service_unavailable", &message, 503),
            ApiError::Configuration(_) => Self::new("configuration_error", &message, 500),
            ApiError::Validation(_) => Self::new("validation_error", &message, 422),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_api_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimitExceeded { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.into());
        }
        response
    }
}
