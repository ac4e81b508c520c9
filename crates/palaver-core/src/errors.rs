//! Error taxonomy for the session layer.
//!
//! - [`UpstreamError`]: the completion provider failed.
//! - [`ProtocolError`]: a client message could not be understood.
//! - [`SessionError`]: an operation named a session that does not exist.

use std::time::Duration;

/// Failures of the upstream completion provider.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Request rejected as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Throttled by the provider.
    #[error("rate limited")]
    RateLimited {
        /// Provider-suggested delay.
        retry_after: Option<Duration>,
    },
    /// 5xx from the provider.
    #[error("server error {status}: {body}")]
    ServerError {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Connection-level failure.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The stream broke after it started.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    /// The provider sent something we could not parse.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Provider configuration is incomplete.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// A client message that cannot be acted on. Reported inline; the session continues.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON at all.
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    /// JSON that does not match the request schema.
    #[error("Invalid request format: {0}")]
    InvalidRequest(String),
    /// A `command` other than `stop`.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Operations on sessions the registry does not know.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session with this id.
    #[error("session not found: {0}")]
    NotFound(String),
}
