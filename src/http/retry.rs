//! Attempt-level retry decisions.
//!
//! A logical call moves through [`AttemptState`]s. Only two things lead to a
//! retry: a transport failure and a response whose status is in the
//! configured retryable set. Everything else is handed back as-is and
//! classified later by the response parser.

use std::fmt;

use reqwest::StatusCode;

use super::transport::{HttpResponse, TransportError};
use crate::config::RetryConfig;
use crate::error::Error;

/// Why a physical attempt did not produce a usable response.
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    Transport(TransportError),
    /// Retryable status; the response was dropped unread.
    Status(StatusCode),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport(e) => write!(f, "{}", e),
            AttemptFailure::Status(status) => write!(f, "HTTP {}", status),
        }
    }
}

#[derive(Debug)]
pub(crate) enum AttemptState {
    /// About to make physical attempt `n` (0-based).
    Attempting(u32),
    Succeeded(HttpResponse),
    /// Attempt `attempt` failed and at least one attempt remains.
    FailedTransient { attempt: u32, failure: AttemptFailure },
    /// No attempts remain.
    FailedFatal(Error),
    Cancelled(Error),
}

/// Next state after attempt `attempt` received `response`.
pub(crate) fn on_response(policy: &RetryConfig, attempt: u32, response: HttpResponse) -> AttemptState {
    let status = response.status();
    if policy.is_retryable_status(status.as_u16()) && attempt < policy.max_retries {
        return AttemptState::FailedTransient {
            attempt,
            failure: AttemptFailure::Status(status),
        };
    }
    AttemptState::Succeeded(response)
}

/// Next state after attempt `attempt` failed below HTTP.
pub(crate) fn on_transport_error(
    policy: &RetryConfig,
    attempt: u32,
    error: TransportError,
) -> AttemptState {
    if attempt < policy.max_retries {
        return AttemptState::FailedTransient {
            attempt,
            failure: AttemptFailure::Transport(error),
        };
    }
    AttemptState::FailedFatal(Error::RetriesExhausted {
        attempts: attempt + 1,
        source: error,
    })
}
