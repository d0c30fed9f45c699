//! Turning a raw [`HttpResponse`] into a decoded value or a classified error.

use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transport::HttpResponse;
use crate::context::CallContext;
use crate::error::{ApiError, Error, Result, Stage, code_from_string_or_number};

/// Reads the body of `response` and decodes it into `T`.
///
/// Failure statuses (>= 400) become [`Error::Api`] when the body carries a
/// platform error code, and [`Error::Http`] otherwise. A success body that
/// does not match `T` is [`Error::Decode`].
pub async fn parse_into<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    let (status, body) = read_body(None, response).await?;
    decode(status, &body)
}

/// [`parse_into`], aborting the body read with [`Error::Cancelled`] as soon
/// as `ctx` finishes.
pub async fn parse_into_with<T: DeserializeOwned>(
    ctx: &CallContext,
    response: HttpResponse,
) -> Result<T> {
    let (status, body) = read_body(Some(ctx), response).await?;
    decode(status, &body)
}

/// Unwraps the `{code, message, request_id, data}` envelope and rejects a
/// non-zero `code` even on HTTP 200. The body read is raced against `ctx`.
pub async fn parse_envelope<T: DeserializeOwned>(
    ctx: &CallContext,
    response: HttpResponse,
) -> Result<T> {
    let (status, body) = read_body(Some(ctx), response).await?;
    let envelope: ApiEnvelope<Value> = decode(status, &body)?;

    if envelope.has_error_code() {
        return Err(envelope.into_api_error(status).into());
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null)).map_err(Error::Decode)
}

/// Reads the whole body. Dropping the read on cancellation releases the
/// connection.
async fn read_body(
    ctx: Option<&CallContext>,
    response: HttpResponse,
) -> Result<(StatusCode, Vec<u8>)> {
    let status = response.status();
    let body = match ctx {
        Some(ctx) => tokio::select! {
            biased;
            reason = ctx.done() => {
                debug!("Body read for HTTP {} aborted: {}", status, reason);
                return Err(Error::Cancelled { stage: Stage::Send, reason });
            }
            body = response.bytes() => body,
        },
        None => response.bytes().await,
    };
    Ok((status, body.map_err(Error::Body)?))
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
    if status.as_u16() >= 400 {
        return Err(error_from_body(status, body));
    }
    serde_json::from_slice(body).map_err(Error::Decode)
}

fn error_from_body(status: StatusCode, body: &[u8]) -> Error {
    match serde_json::from_slice::<ApiError>(body) {
        Ok(mut api_error) if api_error.has_code() => {
            api_error.http_status = status.as_u16();
            Error::Api(api_error)
        }
        result => {
            if let Err(e) = result {
                debug!("Error body for HTTP {} is not an API error: {}", status, e);
            }
            Error::Http {
                status,
                body: String::from_utf8_lossy(body).into_owned(),
            }
        }
    }
}

/// Standard response wrapper used by every platform endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default, deserialize_with = "code_from_string_or_number")]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// A zero or missing code means success.
    pub fn has_error_code(&self) -> bool {
        !self.code.is_empty() && self.code != "0"
    }
}

impl ApiEnvelope<Value> {
    /// Moves the envelope, including any non-null `data`, into an [`ApiError`].
    fn into_api_error(self, status: StatusCode) -> ApiError {
        let err = ApiError::new(self.code, self.message, self.request_id, status.as_u16());
        match self.data {
            Some(data) if !data.is_null() => err.with_data(data),
            _ => err,
        }
    }
}

impl<T: DeserializeOwned> ApiEnvelope<T> {
    /// Returns the payload, or the envelope as an [`Error::Api`] when its code
    /// is non-zero. A missing `data` is decoded from `null`.
    pub fn into_data(self, status: StatusCode) -> Result<T> {
        if self.has_error_code() {
            return Err(
                ApiError::new(self.code, self.message, self.request_id, status.as_u16()).into(),
            );
        }
        match self.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(Value::Null).map_err(Error::Decode),
        }
    }
}
