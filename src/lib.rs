//! Core of an advertising platform API client: a shared token-bucket rate
//! limiter, a retrying request executor and a response parser with error
//! classification.
//!
//! ```no_run
//! # async fn run() -> adsapi::Result<()> {
//! use adsapi::{ApiRequest, CallContext, Client, Config};
//!
//! let client = Client::new(Config::new("my-access-token"))?;
//! let info: serde_json::Value = client
//!     .call(
//!         &CallContext::new(),
//!         ApiRequest::get("/open_api/v1.3/advertiser/info/").query("advertiser_ids", "[\"42\"]"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use client::Client;
pub use config::{BackoffStrategy, Config, ConfigError, RateLimitConfig, RetryConfig};
pub use context::{CallContext, CancelReason};
pub use error::{ApiError, Error, ErrorKind, Result};
pub use http::{ApiEnvelope, ApiRequest, HttpResponse};
pub use ratelimit::RateLimiter;
