use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::classify::{self, ErrorKind};

/// Error codes the platform returns in the `code` field.
pub mod codes {
    // Authentication
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const INVALID_ACCESS_TOKEN: &str = "INVALID_ACCESS_TOKEN";
    pub const ACCESS_TOKEN_EXPIRED: &str = "ACCESS_TOKEN_EXPIRED";
    pub const INSUFFICIENT_PERMISSIONS: &str = "INSUFFICIENT_PERMISSIONS";

    // Validation
    pub const INVALID_PARAMETER: &str = "INVALID_PARAMETER";
    pub const MISSING_PARAMETER: &str = "MISSING_PARAMETER";
    pub const PARAMETER_VALUE_NOT_SUPPORTED: &str = "PARAMETER_VALUE_NOT_SUPPORTED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

    // Rate limiting
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

    // Server
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const TIMEOUT: &str = "TIMEOUT";

    // Resources
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const RESOURCE_CONFLICT: &str = "RESOURCE_CONFLICT";
    pub const RESOURCE_LIMIT_EXCEEDED: &str = "RESOURCE_LIMIT_EXCEEDED";

    // Business rules
    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const CAMPAIGN_NOT_ACTIVE: &str = "CAMPAIGN_NOT_ACTIVE";
    pub const ADGROUP_NOT_ACTIVE: &str = "ADGROUP_NOT_ACTIVE";
    pub const CREATIVE_NOT_APPROVED: &str = "CREATIVE_NOT_APPROVED";
}

/// Structured error payload returned by the platform.
///
/// Wire shape: `{"code": ..., "message": ..., "request_id": ..., "data": ...}`.
/// `code` may arrive as a string or an integer; integers are kept as their
/// decimal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, deserialize_with = "code_from_string_or_number")]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Status of the response that carried the payload. Not part of the body.
    #[serde(skip)]
    pub http_status: u16,
}

pub(crate) fn code_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<Code>::deserialize(deserializer)? {
        Some(Code::Text(text)) => text,
        Some(Code::Number(number)) => number.to_string(),
        None => String::new(),
    })
}

impl ApiError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
        http_status: u16,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: request_id.into(),
            data: None,
            http_status,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True when the payload names an actual error. A zero code means success.
    pub fn has_code(&self) -> bool {
        !self.code.is_empty() && self.code != "0"
    }

    pub fn kind(&self) -> ErrorKind {
        classify::classify(self.http_status, &self.code)
    }

    pub fn is_retryable(&self) -> bool {
        classify::is_retryable(self.http_status, &self.code)
    }

    pub fn is_authentication_error(&self) -> bool {
        classify::is_authentication(self.http_status, &self.code)
    }

    pub fn is_validation_error(&self) -> bool {
        classify::is_validation(self.http_status, &self.code)
    }

    pub fn is_rate_limit_error(&self) -> bool {
        classify::is_rate_limit(self.http_status, &self.code)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error [{}]: {}", self.code, self.message)?;
        if !self.request_id.is_empty() {
            write!(f, " (request_id: {})", self.request_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}
