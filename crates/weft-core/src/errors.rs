use std::time::Duration;

/// Typed error hierarchy for model adapter operations.
/// Classifies failures as fatal (caller misconfiguration) or retryable
/// (transient upstream trouble). The turn loop itself never retries — the
/// classification exists for logging and for callers deciding what to do
/// with a failed turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ModelError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed model output: {0}")]
    Decode(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Operational
    #[error("empty response from model")]
    EmptyResponse,
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ConnectionFailed(_)
                | Self::StreamInterrupted(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::Decode(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Decode(_) => "decode",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::EmptyResponse => "empty_response",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
