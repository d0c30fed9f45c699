//! The public entry point tying configuration, rate limiting, retries and
//! parsing together.

use log::debug;
use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::config::{Config, mask_secret};
use crate::context::CallContext;
use crate::error::Result;
use crate::http::{self, ApiRequest, Executor, HttpResponse, ReqwestTransport, Transport};
use crate::ratelimit::RateLimiter;

/// Client for the advertising API.
///
/// Cheap to share: wrap it in an `Arc` and issue calls from many tasks. All
/// calls share one connection pool and one rate limiter.
#[derive(Debug)]
pub struct Client<T: Transport = ReqwestTransport> {
    config: Config,
    executor: Executor<T>,
}

impl Client<ReqwestTransport> {
    /// Validates `config` and builds a client on a fresh connection pool.
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::from_config(&config)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Client<T> {
    /// Builds a client on a caller-supplied transport.
    pub fn with_transport(config: Config, transport: T) -> Result<Self> {
        let limiter = RateLimiter::from_config(config.rate_limit.as_ref());
        let executor = Executor::new(&config, transport, limiter)?;

        debug!(
            "Client ready for {} (token: {}, rate limit: {:?}, retries: {})",
            executor.base_url(),
            config
                .access_token
                .as_deref()
                .map(mask_secret)
                .unwrap_or_else(|| "<client credentials>".to_string()),
            config.rate_limit,
            executor.retry_policy().max_retries
        );

        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        self.executor.rate_limiter()
    }

    /// Resolves `path` against the base URL and appends `params` as the
    /// query string.
    pub fn build_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.executor.resolve(path, &query)
    }

    /// Performs one logical call and returns the raw response. See
    /// [`Executor::execute`].
    pub async fn execute(&self, ctx: &CallContext, request: ApiRequest) -> Result<HttpResponse> {
        self.executor.execute(ctx, request).await
    }

    /// Decodes a response returned by [`Client::execute`].
    pub async fn parse_into<R: DeserializeOwned>(&self, response: HttpResponse) -> Result<R> {
        http::parse_into(response).await
    }

    /// Like [`Client::parse_into`], but stops reading the body once `ctx`
    /// finishes.
    pub async fn parse_into_with<R: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        response: HttpResponse,
    ) -> Result<R> {
        http::parse_into_with(ctx, response).await
    }

    /// Executes `request` and returns the `data` of the response envelope.
    #[tracing::instrument(skip(self, ctx, request), fields(path = %request.path()))]
    pub async fn call<R: DeserializeOwned>(&self, ctx: &CallContext, request: ApiRequest) -> Result<R> {
        let response = self.execute(ctx, request).await?;
        http::parse_envelope(ctx, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::{Error, ErrorKind};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct AdvertiserInfo {
        advertiser_id: String,
        name: String,
        currency: String,
    }

    fn config(base_url: &str) -> Config {
        Config {
            base_url: base_url.to_string(),
            retry: Some(RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryConfig::default()
            }),
            ..Config::new("test_token_0123456789")
        }
    }

    #[test]
    fn test_missing_credentials_fail_construction() {
        let err = Client::new(Config::default()).unwrap_err();
        match err {
            Error::Config(e) => assert_eq!(e.field, "Authentication"),
            other => panic!("expected config error, got {:?}", other),
        }
        assert_eq!(
            Client::new(Config::default()).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_invalid_base_url_fails_construction() {
        let err = Client::new(config("not a url")).unwrap_err();
        assert!(matches!(err, Error::Config(ref e) if e.field == "BaseURL"));
    }

    #[test]
    fn test_build_url() {
        let client = Client::new(config("https://business-api.tiktok.com/open_api/v1.3/")).unwrap();

        let url = client
            .build_url("advertiser/info/", &[("advertiser_ids", r#"["1","2"]"#)])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://business-api.tiktok.com/open_api/v1.3/advertiser/info/?advertiser_ids=%5B%221%22%2C%222%22%5D"
        );

        let url = client.build_url("/health", &[]).unwrap();
        assert_eq!(url.as_str(), "https://business-api.tiktok.com/health");
    }

    #[test]
    fn test_rate_limiter_follows_config() {
        let client = Client::new(config("https://example.com")).unwrap();
        assert!(client.rate_limiter().is_limited());

        let unlimited = Client::new(Config {
            rate_limit: None,
            ..config("https://example.com")
        })
        .unwrap();
        assert!(!unlimited.rate_limiter().is_limited());
    }

    #[test_log::test(tokio::test)]
    async fn test_call_decodes_envelope() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/open_api/v1.3/advertiser/info/")
            .match_query(mockito::Matcher::UrlEncoded(
                "advertiser_id".into(),
                "42".into(),
            ))
            .match_header("access-token", "test_token_0123456789")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code": 0, "message": "OK", "request_id": "r1", "data": {"advertiser_id": "42", "name": "Acme", "currency": "USD"}}"#,
            )
            .create_async()
            .await;

        let client = Client::new(config(&server.url())).unwrap();
        let info: AdvertiserInfo = client
            .call(
                &CallContext::new(),
                ApiRequest::get("/open_api/v1.3/advertiser/info/").query("advertiser_id", 42),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(info.advertiser_id, "42");
        assert_eq!(info.name, "Acme");
        assert_eq!(info.currency, "USD");
    }

    #[tokio::test]
    async fn test_retry_then_api_error() {
        let mut server = mockito::Server::new_async().await;

        let unavailable = server
            .mock("POST", "/campaign/create/")
            .with_status(503)
            .with_body("unavailable")
            .expect(1)
            .create_async()
            .await;

        let client = Client::new(Config {
            retry: Some(RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                retryable_status_codes: vec![503],
                ..RetryConfig::default()
            }),
            ..config(&server.url())
        })
        .unwrap();

        // The 503 mock serves until its single expected hit is used up.
        let rejected = server
            .mock("POST", "/campaign/create/")
            .with_status(400)
            .with_body(r#"{"code": "INVALID_PARAMETER", "message": "budget too low", "request_id": "r7"}"#)
            .expect(1)
            .create_async()
            .await;

        let request = ApiRequest::post("/campaign/create/")
            .json(&serde_json::json!({"budget": 1}))
            .unwrap();
        let response = client.execute(&CallContext::new(), request).await.unwrap();
        let err = client
            .parse_into::<serde_json::Value>(response)
            .await
            .unwrap_err();

        unavailable.assert_async().await;
        rejected.assert_async().await;
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.as_api_error().unwrap().request_id, "r7");
    }

    #[tokio::test]
    async fn test_call_cancelled_while_body_stalls() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = Client::new(Config {
            timeout: Duration::from_secs(20),
            ..config(&format!("http://{}", addr))
        })
        .unwrap();

        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = client
            .call::<serde_json::Value>(&ctx, ApiRequest::get("/report/"))
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
        assert!(err.is_cancelled(), "got {:?}", err);
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_envelope_error_on_200() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/campaign/get/")
            .with_status(200)
            .with_body(r#"{"code": "ACCESS_TOKEN_EXPIRED", "message": "expired", "request_id": "r8"}"#)
            .create_async()
            .await;

        let client = Client::new(config(&server.url())).unwrap();
        let err = client
            .call::<serde_json::Value>(&CallContext::new(), ApiRequest::get("/campaign/get/"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.as_api_error().unwrap().is_authentication_error());
    }
}
