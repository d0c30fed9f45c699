//! Client configuration and its construction-time validation.

use std::fmt;
use std::time::Duration;

use reqwest::Url;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://business-api.tiktok.com";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes retried when a [`RetryConfig`] does not list its own.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Crate version stamped by `build.rs`.
pub const VERSION: &str = env!("ADSAPI_VERSION");

/// Returns the default `User-Agent` value.
pub fn default_user_agent() -> String {
    format!("adsapi-rust/{}", VERSION)
}

/// A configuration field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid config field '{field}': {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// How the delay between retries grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// `initial_delay * attempt`
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    #[default]
    Exponential,
    /// `initial_delay` every time
    Fixed,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::Fixed => write!(f, "fixed"),
        }
    }
}

impl std::str::FromStr for BackoffStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "fixed" => Ok(BackoffStrategy::Fixed),
            _ => Err(ConfigError::new(
                "RetryConfig.BackoffStrategy",
                format!(
                    "unknown backoff strategy '{}', expected linear, exponential or fixed",
                    s
                ),
            )),
        }
    }
}

/// Retry behavior for failed physical attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; a logical call makes at most `max_retries + 1` sends.
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Growth factor, only used by [`BackoffStrategy::Exponential`].
    pub multiplier: f64,
    /// Statuses worth retrying. Empty means [`DEFAULT_RETRYABLE_STATUS_CODES`].
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Returns true if a response with this status should be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        if self.retryable_status_codes.is_empty() {
            DEFAULT_RETRYABLE_STATUS_CODES.contains(&status)
        } else {
            self.retryable_status_codes.contains(&status)
        }
    }

    /// Delay to wait before retry number `retry` (1-based). Zero for the first attempt.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(retry),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = self.multiplier.powi(exponent);
                let nanos = self.initial_delay.as_nanos() as f64 * factor;
                if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
                    self.max_delay
                } else {
                    Duration::from_nanos(nanos.round() as u64)
                }
            }
        };

        delay.min(self.max_delay)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::new(
                "RetryConfig.InitialDelay",
                "initial delay must be positive",
            ));
        }

        if self.max_delay.is_zero() {
            return Err(ConfigError::new(
                "RetryConfig.MaxDelay",
                "max delay must be positive",
            ));
        }

        if self.max_delay < self.initial_delay {
            return Err(ConfigError::new(
                "RetryConfig.MaxDelay",
                "max delay must not be shorter than the initial delay",
            ));
        }

        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(ConfigError::new(
                "RetryConfig.Multiplier",
                "multiplier must be positive",
            ));
        }

        if let Some(code) = self
            .retryable_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(ConfigError::new(
                "RetryConfig.RetryableStatusCodes",
                format!("{} is not an HTTP status code", code),
            ));
        }

        Ok(())
    }
}

/// Token-bucket admission settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained refill rate.
    pub requests_per_second: f64,
    /// Tokens the bucket can bank.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ConfigError::new(
                "RateLimit.RequestsPerSecond",
                "requests per second must be positive",
            ));
        }

        if self.burst_size == 0 {
            return Err(ConfigError::new(
                "RateLimit.BurstSize",
                "burst size must be positive",
            ));
        }

        Ok(())
    }
}

/// Settings for a [`crate::Client`]. Validated once by [`Config::validate`]
/// when the client is built and never changed afterwards.
#[derive(Clone, PartialEq)]
pub struct Config {
    pub base_url: String,
    pub access_token: Option<String>,
    /// App credentials, accepted in place of an access token.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: Duration,
    /// `None` falls back to [`RetryConfig::default`].
    pub retry: Option<RetryConfig>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    pub user_agent: String,
    /// Log every physical attempt at info level instead of debug.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            client_id: None,
            client_secret: None,
            timeout: DEFAULT_TIMEOUT,
            retry: Some(RetryConfig::default()),
            rate_limit: Some(RateLimitConfig::default()),
            user_agent: default_user_agent(),
            debug: false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_deref().map(mask_secret))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_deref().map(mask_secret))
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("user_agent", &self.user_agent)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Config {
    /// Default configuration authenticated with `access_token`.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Checks every field and returns the parsed base URL.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::new("BaseURL", "base URL is required"));
        }

        let base_url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::new("BaseURL", format!("invalid base URL: {}", e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::new(
                "BaseURL",
                format!("unsupported scheme '{}'", base_url.scheme()),
            ));
        }

        let has_token = self.access_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_client_credentials = self.client_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.client_secret.as_deref().is_some_and(|s| !s.is_empty());
        if !has_token && !has_client_credentials {
            return Err(ConfigError::new(
                "Authentication",
                "either access token or client credentials are required",
            ));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::new("Timeout", "timeout must be positive"));
        }

        if reqwest::header::HeaderValue::from_str(&self.user_agent).is_err() {
            return Err(ConfigError::new(
                "UserAgent",
                "user agent contains invalid header characters",
            ));
        }

        if let Some(retry) = &self.retry {
            retry.validate()?;
        }

        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }

        Ok(base_url)
    }
}

/// Masks a secret for display, keeping a short prefix and suffix of long values.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        return "*".repeat(8);
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
