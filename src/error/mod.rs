//! Error types surfaced by the client and their classification.
//!
//! Every failure a caller sees is an [`Error`]. [`Error::kind`] maps it onto the
//! [`ErrorKind`] taxonomy so callers can branch on "gave up waiting" versus
//! "server rejected" versus "contract mismatch" without matching variants.

mod api;
mod classify;

use std::fmt;

use reqwest::StatusCode;

pub use api::{ApiError, codes};
pub(crate) use api::code_from_string_or_number;
pub use classify::{ErrorKind, classify};

use crate::config::ConfigError;
use crate::context::CancelReason;
use crate::http::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where in a logical call cancellation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a rate-limiter token.
    RateLimit,
    /// Waiting for the transport response.
    Send,
    /// Sleeping between attempts.
    Backoff,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::RateLimit => write!(f, "rate limit wait"),
            Stage::Send => write!(f, "request"),
            Stage::Backoff => write!(f, "retry backoff"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request could not be built (bad path, header or query).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{stage} aborted: {reason}")]
    Cancelled { stage: Stage, reason: CancelReason },

    /// Every physical attempt failed without a usable response.
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Failure status whose body was not a recognisable API error.
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("failed to read response body: {0}")]
    Body(#[source] TransportError),

    #[error("failed to parse response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::InvalidRequest(_) | Error::Encode(_) => ErrorKind::Validation,
            Error::Cancelled { .. } => ErrorKind::Cancellation,
            Error::RetriesExhausted { .. } | Error::Body(_) => ErrorKind::Transport,
            Error::Api(e) => e.kind(),
            Error::Http { status, .. } => classify(status.as_u16(), ""),
            Error::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Whether the caller may reasonably try the logical call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api(e) => e.is_retryable(),
            other => other.kind().is_retryable(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// The structured platform error, if this is one.
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status of the response behind this error, if one was received.
    pub fn http_status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(e) => StatusCode::from_u16(e.http_status).ok(),
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TransportErrorKind;

    #[test]
    fn test_kind_mapping() {
        let config = Error::from(ConfigError {
            field: "Timeout",
            message: "timeout must be positive".to_string(),
        });
        assert_eq!(config.kind(), ErrorKind::Configuration);

        let cancelled = Error::Cancelled {
            stage: Stage::RateLimit,
            reason: CancelReason::Cancelled,
        };
        assert_eq!(cancelled.kind(), ErrorKind::Cancellation);
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable());

        let exhausted = Error::RetriesExhausted {
            attempts: 4,
            source: TransportError::new(
                TransportErrorKind::Connect,
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            ),
        };
        assert_eq!(exhausted.kind(), ErrorKind::Transport);
        assert!(exhausted.to_string().starts_with("request failed after 4 attempts"));

        let http = Error::Http {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "down".to_string(),
        };
        assert_eq!(http.kind(), ErrorKind::RetryableServer);
        assert_eq!(http.http_status(), Some(StatusCode::SERVICE_UNAVAILABLE));

        let decode = Error::Decode(serde_json::from_str::<u32>("nope").unwrap_err());
        assert_eq!(decode.kind(), ErrorKind::Decode);
        assert!(!decode.is_retryable());
    }

    #[test]
    fn test_api_error_passthrough() {
        let err = Error::from(ApiError::new(codes::RATE_LIMIT_EXCEEDED, "slow", "r1", 200));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.is_retryable());
        assert_eq!(err.as_api_error().unwrap().request_id, "r1");
        assert_eq!(err.http_status(), Some(StatusCode::OK));
        assert_eq!(err.to_string(), "API error [RATE_LIMIT_EXCEEDED]: slow (request_id: r1)");
    }

    #[test]
    fn test_cancelled_display() {
        let err = Error::Cancelled {
            stage: Stage::Send,
            reason: CancelReason::DeadlineExceeded,
        };
        assert_eq!(err.to_string(), "request aborted: context deadline exceeded");
    }
}
