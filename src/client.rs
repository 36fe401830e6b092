//! HTTP client module shared by the token provider and the collector.
//!
//! This module wraps a pooled `reqwest::Client` and applies one retry policy
//! to every request sent through it: transient status codes and
//! connection-level failures are retried with exponential backoff, all other
//! responses are handed back to the caller untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{CollectorError, Result};

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Maximum delay between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

/// Retry settings applied to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request, the first try included
    pub max_attempts: u32,

    /// Backoff factor; retry `n` waits `backoff_base * 2^(n-1)`
    pub backoff_base: Duration,

    /// Upper bound for a single wait
    pub max_delay: Duration,

    /// Status codes that trigger a retry
    pub retry_statuses: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            max_delay: MAX_RETRY_DELAY,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Check whether a response status should be retried.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Calculate the backoff delay before retry number `retry` (1-based).
    ///
    /// Uses exponential backoff with jitter:
    /// delay = min(base * 2^(retry-1) + jitter, max_delay)
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let exponent = retry.saturating_sub(1).min(16);
        let exponential_ms = base_ms.saturating_mul(1 << exponent);

        // Add jitter (up to 25% of the delay)
        let jitter_ms = rand::random::<u64>() % (exponential_ms / 4 + 1);

        Duration::from_millis(exponential_ms.saturating_add(jitter_ms)).min(self.max_delay)
    }
}

/// Counters for requests sent through an [`ActivityClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Total number of HTTP attempts, retries included
    pub attempts: u64,

    /// Number of attempts that were retries
    pub retries: u64,
}

/// HTTP client with connection pooling and a transparent retry policy.
///
/// Connection failures and timeouts are retried like transient statuses;
/// when attempts run out they surface as
/// [`CollectorError::TransientNetwork`].
///
/// # Example
///
/// ```no_run
/// use management_activity_collector::client::ActivityClient;
/// use management_activity_collector::config::{Config, Credentials};
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::new(Credentials::new("tenant", "client", "secret"));
///     let client = ActivityClient::new(&config).expect("Failed to create client");
///
///     let response = client
///         .execute(|http| http.get("https://manage.office.com"))
///         .await;
///     println!("{:?}", response.map(|r| r.status()));
/// }
/// ```
pub struct ActivityClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Retry settings
    policy: RetryPolicy,

    /// Request timeout duration
    timeout: Duration,

    attempts: AtomicU64,
    retries: AtomicU64,
}

impl ActivityClient {
    /// Create a new client with the timeout and retry settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Client` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_settings(config.request_timeout, config.retry_policy())
    }

    /// Create a new client with custom settings.
    pub fn with_settings(timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CollectorError::Client(e.to_string()))?;

        Ok(Self {
            client,
            policy,
            timeout,
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    /// Send a request, retrying per the policy.
    ///
    /// `build` is called once per attempt so every attempt sends a fresh
    /// request. Any response whose status is not retryable is returned as-is,
    /// success or not; mapping a failure status to an error is up to the
    /// caller.
    pub async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if attempt > 1 {
                self.retries.fetch_add(1, Ordering::Relaxed);
            }

            let result = build(&self.client).timeout(self.timeout).send().await;

            let (url, last_error, retry_after) = match result {
                Ok(response) => {
                    let status = response.status();
                    if !self.policy.is_retryable_status(status) {
                        debug!(url = %response.url(), status = %status, attempt, "Request completed");
                        return Ok(response);
                    }
                    (
                        response.url().to_string(),
                        format!("server returned {}", status),
                        parse_retry_after(response.headers()),
                    )
                }
                Err(e) => {
                    let url = e.url().map(|u| u.to_string()).unwrap_or_default();
                    if !is_retryable_error(&e) {
                        error!(error = %e, url = %url, "Request failed permanently");
                        return Err(CollectorError::Http(e));
                    }
                    (url, e.to_string(), None)
                }
            };

            if attempt >= max_attempts {
                error!(
                    url = %url,
                    attempts = attempt,
                    last_error = %last_error,
                    "Request failed, retries exhausted"
                );
                return Err(CollectorError::TransientNetwork {
                    url,
                    attempts: attempt,
                    last_error,
                });
            }

            let backoff = self.policy.backoff_delay(attempt);
            let delay = retry_after
                .map_or(backoff, |hint| hint.max(backoff))
                .min(self.policy.max_delay);

            warn!(
                url = %url,
                error = %last_error,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Request failed, will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Get a snapshot of the request counters.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Check if a transport error is worth retrying.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Read a `Retry-After` hint given either in seconds or as an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}
