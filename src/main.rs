use std::time::Duration;

use adsapi::config::{VERSION, mask_secret};
use adsapi::{ApiRequest, BackoffStrategy, CallContext, Client, Config, RateLimitConfig};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::warn;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// adsapi - advertising platform API client
///
/// Sends authenticated, rate-limited requests with automatic retries and
/// prints the JSON response.
///
/// Credentials are read from ADSAPI_ACCESS_TOKEN (or ADSAPI_CLIENT_ID and
/// ADSAPI_CLIENT_SECRET) when not given on the command line.
///
/// Examples:
///   adsapi request GET /open_api/v1.3/advertiser/info/ -q advertiser_ids='["42"]' --envelope
///   adsapi config
#[derive(Parser, Debug)]
#[command(author, version = VERSION, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (defaults to https://business-api.tiktok.com)
    #[arg(long, env = "ADSAPI_BASE_URL", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Access token sent with every request
    #[arg(long, env = "ADSAPI_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// App id, accepted together with --client-secret instead of a token
    #[arg(long, env = "ADSAPI_CLIENT_ID", global = true)]
    client_id: Option<String>,

    #[arg(long, env = "ADSAPI_CLIENT_SECRET", hide_env_values = true, global = true)]
    client_secret: Option<String>,

    /// Per-request timeout
    #[arg(long, value_name = "SECONDS", global = true)]
    timeout: Option<u64>,

    /// Retries after the first attempt
    #[arg(long, value_name = "N", global = true)]
    max_retries: Option<u32>,

    /// Backoff between retries: linear, exponential or fixed
    #[arg(long, value_name = "STRATEGY", global = true)]
    backoff: Option<BackoffStrategy>,

    /// Delay before the first retry
    #[arg(long, value_name = "MILLIS", global = true)]
    retry_delay: Option<u64>,

    /// Sustained request rate
    #[arg(long, value_name = "RPS", global = true)]
    rate: Option<f64>,

    /// Requests allowed in a burst
    #[arg(long, value_name = "N", global = true)]
    burst: Option<u32>,

    /// Disable client-side rate limiting
    #[arg(long, global = true, conflicts_with_all = ["rate", "burst"])]
    no_rate_limit: bool,

    /// Log every attempt
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send a request and print the JSON response
    Request(RequestArgs),

    /// Print the effective configuration with secrets masked
    Config,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// HTTP method, e.g. GET or POST
    #[arg(value_name = "METHOD")]
    method: String,

    /// Path relative to the base URL
    #[arg(value_name = "PATH")]
    path: String,

    /// Query parameter, repeatable
    #[arg(short = 'q', long = "query", value_name = "KEY=VALUE", value_parser = parse_query)]
    query: Vec<(String, String)>,

    /// Extra header, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// JSON request body
    #[arg(short = 'd', long = "data", value_name = "JSON")]
    data: Option<String>,

    /// Unwrap the {code, message, data} envelope and fail on a non-zero code
    #[arg(long)]
    envelope: bool,
}

fn parse_query(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME:VALUE, got '{}'", s)),
    }
}

impl Cli {
    /// Layers the command line over the library defaults.
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        config.access_token = self.access_token.clone();
        config.client_id = self.client_id.clone();
        config.client_secret = self.client_secret.clone();
        if let Some(timeout) = self.timeout {
            config.timeout = Duration::from_secs(timeout);
        }

        let mut retry = config.retry_policy();
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }
        if let Some(backoff) = self.backoff {
            retry.backoff = backoff;
        }
        if let Some(delay) = self.retry_delay {
            retry.initial_delay = Duration::from_millis(delay);
            retry.max_delay = retry.max_delay.max(retry.initial_delay);
        }
        config.retry = Some(retry);

        config.rate_limit = if self.no_rate_limit {
            None
        } else {
            let defaults = RateLimitConfig::default();
            Some(RateLimitConfig {
                requests_per_second: self.rate.unwrap_or(defaults.requests_per_second),
                burst_size: self.burst.unwrap_or(defaults.burst_size),
            })
        };

        config.debug = self.verbose;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = cli.config();
    match cli.command {
        Commands::Request(args) => request(config, args).await?,
        Commands::Config => show_config(&config)?,
    }
    Ok(())
}

async fn request(config: Config, args: RequestArgs) -> Result<()> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("Invalid HTTP method '{}'", args.method))?;

    let mut request = ApiRequest::new(method, args.path);
    for (key, value) in args.query {
        request = request.query(key, value);
    }
    for (name, value) in args.headers {
        request = request.header(name, value);
    }
    if let Some(data) = args.data {
        let body: Value = serde_json::from_str(&data).context("--data is not valid JSON")?;
        request = request.json(&body)?;
    }

    let client = Client::new(config).context("Failed to create client")?;

    let token = CancellationToken::new();
    let ctx = CallContext::from_token(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request...");
            token.cancel();
        }
    });

    let value: Value = if args.envelope {
        client.call(&ctx, request).await?
    } else {
        let response = client.execute(&ctx, request).await?;
        client.parse_into_with(&ctx, response).await?
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let base_url = config.validate().context("Invalid configuration")?;
    let retry = config.retry_policy();
    let masked = |secret: &Option<String>| {
        secret
            .as_deref()
            .map(mask_secret)
            .unwrap_or_else(|| "<unset>".to_string())
    };

    println!("base_url:      {}", base_url);
    println!("access_token:  {}", masked(&config.access_token));
    println!(
        "client_id:     {}",
        config.client_id.as_deref().unwrap_or("<unset>")
    );
    println!("client_secret: {}", masked(&config.client_secret));
    println!("timeout:       {:?}", config.timeout);
    println!(
        "retry:         {} x {} ({:?} -> {:?}, x{})",
        retry.max_retries, retry.backoff, retry.initial_delay, retry.max_delay, retry.multiplier
    );
    match &config.rate_limit {
        Some(limit) => println!(
            "rate_limit:    {} rps, burst {}",
            limit.requests_per_second, limit.burst_size
        ),
        None => println!("rate_limit:    disabled"),
    }
    println!("user_agent:    {}", config.user_agent);
    Ok(())
}
