//! HTTP transport over the Tor SOCKS proxy
//!
//! This module handles all network access for the crawler, including:
//! - Building the proxied HTTP client
//! - Same-host redirect following
//! - Error classification into [`TransportError`]
//! - Retry with linear backoff for transient failures
//! - The startup readiness probe for the proxy

use crate::config::{CrawlerConfig, TorConfig};
use crate::StartupError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirect hops followed within one host
const MAX_REDIRECTS: usize = 10;

/// Why a fetch produced no usable response
///
/// The `Display` form is exactly what gets persisted in a record's `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,

    #[error("connection_refused: {0}")]
    ConnectionRefused(String),

    #[error("protocol_error: {0}")]
    Protocol(String),

    #[error("http_error({0})")]
    Http(u16),
}

impl TransportError {
    /// Only timeouts and refused connections are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionRefused(_))
    }

    /// HTTP status carried by the error, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(code) => Some(*code),
            _ => None,
        }
    }
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after same-host redirects
        final_url: Url,
        status_code: u16,
        headers: HeaderMap,
        body: String,
        /// Content-Type header value, if any
        content_type: Option<String>,
    },

    /// The server redirected to another host; the target was not fetched
    Redirect {
        status_code: u16,
        /// Absolute redirect target
        location: Url,
    },

    /// Every attempt failed
    Failed {
        error: TransportError,
        /// Attempts made, including the first
        attempts: u32,
    },
}

/// Performs network fetches for the crawler
///
/// Implementations must not panic on any network condition; every failure is
/// reported through [`FetchResult::Failed`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches one URL, applying the retry policy
    async fn fetch(&self, url: &Url) -> FetchResult;

    /// Asks for a fresh circuit; returns whether one was obtained
    async fn renew_circuit(&self) -> bool {
        false
    }
}

/// Linear backoff retry schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Wait unit; attempt `n` is followed by `n * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Builds the policy from the crawler settings
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs_f64(config.retry_backoff.max(0.0)),
        )
    }

    /// Total number of attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. Returns the final outcome
    /// together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> (Result<T, TransportError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Redirect policy that only follows hops within the same host
fn same_host_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let same_host = attempt
            .previous()
            .last()
            .map(|prev| prev.host_str() == attempt.url().host_str())
            .unwrap_or(false);
        if same_host {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

/// Builds the HTTP client used by [`TorTransport`]
///
/// # Arguments
///
/// * `proxy_url` - SOCKS proxy URL, `None` for a direct client
/// * `timeout` - Connect and total request timeout
/// * `user_agent` - User-Agent header value
///
/// Certificate validation is disabled: onion services rarely carry a
/// certificate chained to a public CA, and the onion address already
/// authenticates the service.
pub fn build_http_client(
    proxy_url: Option<&str>,
    timeout: Duration,
    user_agent: &str,
) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(same_host_redirects())
        .danger_accept_invalid_certs(true)
        .gzip(true)
        .brotli(true);

    let builder = match proxy_url {
        Some(proxy) => builder.proxy(Proxy::all(proxy)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Maps a reqwest failure onto the persisted error categories
fn classify_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::ConnectionRefused(root_cause(error))
    } else {
        TransportError::Protocol(root_cause(error))
    }
}

/// Innermost error message, which is usually the informative one
fn root_cause(error: &reqwest::Error) -> String {
    let mut source: &dyn std::error::Error = error;
    while let Some(next) = source.source() {
        source = next;
    }
    source.to_string()
}

/// Transport that routes every request through the Tor SOCKS proxy
pub struct TorTransport {
    client: Client,
    retry: RetryPolicy,
}

impl TorTransport {
    /// Builds a proxied transport from the configuration
    ///
    /// This does not contact the proxy; see [`probe_proxy`].
    pub fn new(tor: &TorConfig, crawler: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(
            Some(&tor.proxy_url()),
            Duration::from_secs_f64(crawler.request_timeout),
            &crawler.user_agent,
        )?;
        Ok(Self::with_client(client, RetryPolicy::from_config(crawler)))
    }

    /// Wraps an already built client
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchResult, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status();
        let final_url = response.url().clone();

        if status.is_redirection() {
            // Only cross-host redirects reach here; same-host ones were followed
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    TransportError::Protocol(format!("{} without Location header", status))
                })?;
            let location = final_url.join(location).map_err(|e| {
                TransportError::Protocol(format!("bad redirect target {}: {}", location, e))
            })?;
            return Ok(FetchResult::Redirect {
                status_code: status.as_u16(),
                location,
            });
        }

        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| classify_error(&e))?;

        Ok(FetchResult::Success {
            final_url,
            status_code: status.as_u16(),
            headers,
            body,
            content_type,
        })
    }
}

#[async_trait]
impl Transport for TorTransport {
    async fn fetch(&self, url: &Url) -> FetchResult {
        let (outcome, attempts) = self.retry.run(|_| self.fetch_once(url)).await;
        match outcome {
            Ok(result) => result,
            Err(error) => FetchResult::Failed { error, attempts },
        }
    }

    async fn renew_circuit(&self) -> bool {
        tracing::info!("Circuit renewal requested but not supported by this transport");
        false
    }
}

/// Checks that the proxy accepts TCP connections
///
/// Tries up to `attempts` times, `delay` apart.
pub async fn probe_proxy(addr: &str, attempts: u32, delay: Duration) -> Result<(), StartupError> {
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        let connect = tokio::net::TcpStream::connect(addr);
        match tokio::time::timeout(Duration::from_secs(10), connect).await {
            Ok(Ok(_)) => {
                tracing::info!("Tor proxy at {} is reachable", addr);
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::warn!("Proxy probe {}/{} to {} failed: {}", attempt, attempts, addr, e);
            }
            Err(_) => {
                tracing::warn!("Proxy probe {}/{} to {} timed out", attempt, attempts, addr);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(StartupError::ProxyUnavailable {
        addr: addr.to_string(),
        attempts,
    })
}
