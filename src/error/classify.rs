//! Maps an HTTP status and platform error code onto an [`ErrorKind`].

use std::fmt;

use super::codes;

/// Taxonomy every failure surfaced by the client falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received (connect failure, timeout, broken body).
    Transport,
    /// 429/5xx or a server-side platform code.
    RetryableServer,
    /// 401/403 or a credential-related code.
    Authentication,
    /// 400 or a parameter-related code.
    Validation,
    /// Rate-limit code or 429.
    RateLimit,
    /// The caller gave up waiting.
    Cancellation,
    /// The body did not match the expected shape.
    Decode,
    /// Construction-time configuration problem.
    Configuration,
    /// Any other platform error.
    Other,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed if tried again later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::RetryableServer | ErrorKind::RateLimit
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::RetryableServer => "retryable server",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate limit",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Decode => "decode",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Other => "other",
        };
        write!(f, "{}", name)
    }
}

pub(crate) fn is_rate_limit(http_status: u16, code: &str) -> bool {
    http_status == 429 || code == codes::RATE_LIMIT_EXCEEDED
}

pub(crate) fn is_authentication(http_status: u16, code: &str) -> bool {
    matches!(http_status, 401 | 403)
        || matches!(
            code,
            codes::UNAUTHORIZED
                | codes::FORBIDDEN
                | codes::INVALID_ACCESS_TOKEN
                | codes::ACCESS_TOKEN_EXPIRED
                | codes::INSUFFICIENT_PERMISSIONS
        )
}

pub(crate) fn is_validation(http_status: u16, code: &str) -> bool {
    http_status == 400
        || matches!(
            code,
            codes::INVALID_PARAMETER
                | codes::MISSING_PARAMETER
                | codes::PARAMETER_VALUE_NOT_SUPPORTED
                | codes::VALIDATION_ERROR
        )
}

pub(crate) fn is_retryable(http_status: u16, code: &str) -> bool {
    matches!(http_status, 429 | 500 | 502 | 503 | 504)
        || matches!(
            code,
            codes::RATE_LIMIT_EXCEEDED
                | codes::INTERNAL_ERROR
                | codes::SERVICE_UNAVAILABLE
                | codes::TIMEOUT
        )
}

/// Classifies a platform failure. Pass an empty `code` when the body carried none.
///
/// Checked in order: rate limit, authentication, validation, retryable server.
pub fn classify(http_status: u16, code: &str) -> ErrorKind {
    if is_rate_limit(http_status, code) {
        ErrorKind::RateLimit
    } else if is_authentication(http_status, code) {
        ErrorKind::Authentication
    } else if is_validation(http_status, code) {
        ErrorKind::Validation
    } else if is_retryable(http_status, code) {
        ErrorKind::RetryableServer
    } else {
        ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_status() {
        assert_eq!(classify(429, ""), ErrorKind::RateLimit);
        assert_eq!(classify(401, ""), ErrorKind::Authentication);
        assert_eq!(classify(403, ""), ErrorKind::Authentication);
        assert_eq!(classify(400, ""), ErrorKind::Validation);
        assert_eq!(classify(500, ""), ErrorKind::RetryableServer);
        assert_eq!(classify(502, ""), ErrorKind::RetryableServer);
        assert_eq!(classify(503, ""), ErrorKind::RetryableServer);
        assert_eq!(classify(504, ""), ErrorKind::RetryableServer);
        assert_eq!(classify(404, ""), ErrorKind::Other);
        assert_eq!(classify(501, ""), ErrorKind::Other);
    }

    #[test]
    fn test_classify_by_code() {
        assert_eq!(classify(200, codes::RATE_LIMIT_EXCEEDED), ErrorKind::RateLimit);
        assert_eq!(
            classify(200, codes::ACCESS_TOKEN_EXPIRED),
            ErrorKind::Authentication
        );
        assert_eq!(
            classify(422, codes::MISSING_PARAMETER),
            ErrorKind::Validation
        );
        assert_eq!(
            classify(200, codes::SERVICE_UNAVAILABLE),
            ErrorKind::RetryableServer
        );
        assert_eq!(classify(404, codes::RESOURCE_NOT_FOUND), ErrorKind::Other);
    }

    #[test]
    fn test_rate_limit_code_wins_over_status() {
        // A rate-limit code on a 400 is still a rate-limit failure.
        assert_eq!(classify(400, codes::RATE_LIMIT_EXCEEDED), ErrorKind::RateLimit);
        assert!(classify(400, codes::RATE_LIMIT_EXCEEDED).is_retryable());
    }

    #[test]
    fn test_validation_code_never_retryable() {
        let kind = classify(400, codes::INVALID_PARAMETER);
        assert_eq!(kind, ErrorKind::Validation);
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_kind_retryability() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(ErrorKind::RetryableServer.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Cancellation.is_retryable());
        assert!(!ErrorKind::Decode.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(!ErrorKind::Other.is_retryable());
    }
}
