//! Rate-limited, retrying request execution.

use std::time::Duration;

use log::{Level, log, warn};
use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use super::request::ApiRequest;
use super::retry::{AttemptState, on_response, on_transport_error};
use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::config::{Config, ConfigError, RetryConfig};
use crate::context::CallContext;
use crate::error::{Error, Result, Stage};
use crate::ratelimit::RateLimiter;

/// Header carrying the access credential.
pub const ACCESS_TOKEN_HEADER: &str = "Access-Token";

const APPLICATION_JSON: &str = "application/json";

/// Performs logical calls: resolves the request, then loops over physical
/// attempts, each admitted by the rate limiter, until a usable response,
/// exhaustion or cancellation.
#[derive(Debug)]
pub struct Executor<T> {
    transport: T,
    limiter: RateLimiter,
    retry: RetryConfig,
    base_url: Url,
    access_token: Option<HeaderValue>,
    user_agent: HeaderValue,
    timeout: Duration,
    attempt_log_level: Level,
}

impl<T: Transport> Executor<T> {
    /// Validates `config` and wires the executor to `transport` and `limiter`.
    pub fn new(config: &Config, transport: T, limiter: RateLimiter) -> Result<Self> {
        let base_url = config.validate()?;

        let access_token = match config.access_token.as_deref() {
            Some(token) if !token.is_empty() => {
                let mut value = HeaderValue::from_str(token).map_err(|_| ConfigError {
                    field: "AccessToken",
                    message: "access token contains invalid header characters".to_string(),
                })?;
                value.set_sensitive(true);
                Some(value)
            }
            _ => None,
        };

        let user_agent = HeaderValue::from_str(&config.user_agent).map_err(|_| ConfigError {
            field: "UserAgent",
            message: "user agent contains invalid header characters".to_string(),
        })?;

        Ok(Self {
            transport,
            limiter,
            retry: config.retry_policy(),
            base_url,
            access_token,
            user_agent,
            timeout: config.timeout,
            attempt_log_level: if config.debug { Level::Info } else { Level::Debug },
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL and appends `query`.
    ///
    /// A path starting with `/` replaces the base path. Anything that would
    /// leave the base origin (an absolute or scheme-relative URL) is rejected
    /// so the credential is only ever sent to the configured host.
    pub fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| Error::InvalidRequest(format!("invalid path '{}': {}", path, e)))?;
        if url.origin() != self.base_url.origin() {
            return Err(Error::InvalidRequest(format!(
                "path '{}' does not resolve to the base URL host",
                path
            )));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Builds the physical request. Caller headers go first so the standard
    /// headers always win.
    pub fn build_request(&self, request: &ApiRequest) -> Result<HttpRequest> {
        let url = self.resolve(request.path(), request.query_pairs())?;

        let mut headers = HeaderMap::new();
        for (name, value) in request.headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("invalid header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidRequest(format!("invalid value for header '{}': {}", name, e)))?;
            headers.insert(header_name, header_value);
        }

        if request.body_bytes().is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }
        headers.insert(USER_AGENT, self.user_agent.clone());
        if let Some(token) = &self.access_token {
            headers.insert(HeaderName::from_static("access-token"), token.clone());
        }

        Ok(HttpRequest {
            method: request.method().clone(),
            url,
            headers,
            body: request.body_bytes().map(<[u8]>::to_vec),
            timeout: self.timeout,
        })
    }

    /// Performs one logical call.
    ///
    /// Returns the first response that is not retryable (or the last one),
    /// [`Error::RetriesExhausted`] when every attempt failed in transport,
    /// or [`Error::Cancelled`] as soon as `ctx` finishes. Failure statuses
    /// are returned as responses; see [`crate::http::parse_into`].
    #[tracing::instrument(skip(self, ctx, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn execute(&self, ctx: &CallContext, request: ApiRequest) -> Result<HttpResponse> {
        let request = self.build_request(&request)?;

        let mut state = AttemptState::Attempting(0);
        loop {
            state = match state {
                AttemptState::Attempting(attempt) => self.attempt(ctx, &request, attempt).await,
                AttemptState::FailedTransient { attempt, failure } => {
                    let next = attempt + 1;
                    let delay = self.retry.delay_for(next);
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {:?}...",
                        request.method,
                        request.url.path(),
                        next,
                        self.retry.max_retries + 1,
                        failure,
                        delay
                    );
                    match ctx.sleep(delay).await {
                        Ok(()) => AttemptState::Attempting(next),
                        Err(reason) => AttemptState::Cancelled(Error::Cancelled {
                            stage: Stage::Backoff,
                            reason,
                        }),
                    }
                }
                AttemptState::Succeeded(response) => return Ok(response),
                AttemptState::FailedFatal(err) | AttemptState::Cancelled(err) => return Err(err),
            };
        }
    }

    /// One physical attempt: admission, then send raced against `ctx`.
    async fn attempt(&self, ctx: &CallContext, request: &HttpRequest, attempt: u32) -> AttemptState {
        if let Err(reason) = self.limiter.acquire(ctx).await {
            return AttemptState::Cancelled(Error::Cancelled {
                stage: Stage::RateLimit,
                reason,
            });
        }

        log!(
            self.attempt_log_level,
            "{} {} (attempt {}/{})",
            request.method,
            request.url,
            attempt + 1,
            self.retry.max_retries + 1
        );

        let result = tokio::select! {
            biased;
            reason = ctx.done() => {
                return AttemptState::Cancelled(Error::Cancelled { stage: Stage::Send, reason });
            }
            result = self.transport.send(request.clone()) => result,
        };

        match result {
            Ok(response) => {
                log!(
                    self.attempt_log_level,
                    "{} {} -> {}",
                    request.method,
                    request.url.path(),
                    response.status()
                );
                on_response(&self.retry, attempt, response)
            }
            Err(e) => on_transport_error(&self.retry, attempt, e),
        }
    }
}
