use crate::limiter::RateLimitSignal;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for upstream API calls.
///
/// Only `RateLimited` is ever retried by the limiter; everything else
/// propagates on first occurrence.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        signal: Option<RateLimitSignal>,
        retry_after: Option<Duration>,
    },
    #[error("{code}: {message}")]
    Status { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Stable error code used in tool output envelopes.
    pub fn code(&self) -> &str {
        match self {
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Status { code, .. } => code,
            ApiError::Transport(_) => "upstream_error",
        }
    }

    pub fn retriable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } => true,
            ApiError::Status { code, .. } => code == "upstream_error",
            ApiError::Transport(_) => true,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::RateLimited { message, .. } => message.clone(),
            ApiError::Status { message, .. } => message.clone(),
            ApiError::Transport(m) => m.clone(),
        }
    }
}
