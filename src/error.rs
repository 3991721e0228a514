//! Unified error types for the ingestion pipeline.

use std::time::Duration;

use thiserror::Error;

/// Upstream statuses that warrant a retry.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed upstream payload: {0}")]
    Payload(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl PipelineError {
    /// Effective HTTP status of the error, if it carries one.
    /// Timeouts map to a synthetic 408.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Timeout(_) => Some(408),
            Self::UpstreamStatus { status, .. } => Some(*status),
            Self::Http(e) if e.is_timeout() => Some(408),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the error should be retried (408/429/5xx per upstream contract).
    pub fn is_retryable(&self) -> bool {
        match self.status() {
            Some(s) => RETRYABLE_STATUSES.contains(&s),
            None => false,
        }
    }

    /// Timeouts are tolerated by the pollers and do not count toward the
    /// hot poller's error budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self.status(), Some(408))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_retryable_408() {
        let err = PipelineError::Timeout(Duration::from_secs(15));
        assert_eq!(err.status(), Some(408));
        assert!(err.is_retryable());
        assert!(err.is_timeout());
    }

    #[test]
    fn permanent_statuses_are_not_retryable() {
        for status in [400, 401, 403, 404, 422] {
            let err = PipelineError::UpstreamStatus {
                status,
                message: "nope".into(),
            };
            assert!(!err.is_retryable(), "status {status} must not retry");
        }
    }

    #[test]
    fn transient_statuses_are_retryable() {
        for status in RETRYABLE_STATUSES {
            let err = PipelineError::UpstreamStatus {
                status,
                message: "later".into(),
            };
            assert!(err.is_retryable(), "status {status} must retry");
        }
    }
}
