//! Resilient HTTP layer: one shared blocking client plus retry policies.
//!
//! Two distinct schedules live here. [`RetryPolicy`] is the client's own
//! exponential backoff over transient failures, applied inside every GET.
//! [`IssueRetry`] is the linear schedule the batch driver wraps around
//! whole live-issue fetches. Both are plain values so their schedules can
//! be asserted without sleeping.

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

/// Request timeout applied to every call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes worth another attempt: rate limiting and server errors.
const RETRYABLE_STATUSES: [u16; 6] = [403, 429, 500, 502, 503, 504];

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("GET {url} returned an unusable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to construct HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

pub type Result<T> = core::result::Result<T, HttpError>;

/// Exponential backoff over transient failures.
///
/// Transport-level errors count as transient alongside the retryable
/// statuses; a non-retryable status returns to the caller immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each retry after that.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Whether a response status warrants another attempt.
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        RETRYABLE_STATUSES.contains(&status.as_u16())
    }

    /// Delay owed before retry `n` (1-based): `base * 2^(n-1)`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.pow(retry.saturating_sub(1))
    }
}

/// Linear retry for live-issue fetches: a few attempts, fixed-step waits.
///
/// The sleep before attempt 1 is rate-limit courtesy rather than a retry;
/// attempt `n > 1` waits `step * n` (10s, 15s with the 5s default).
#[derive(Debug, Clone)]
pub struct IssueRetry {
    /// Total attempts, the initial one included.
    pub max_attempts: u32,

    /// Step multiplied by the attempt number for retry waits.
    pub step: Duration,

    /// Courtesy sleep before the first attempt.
    pub pacing: Duration,
}

impl IssueRetry {
    pub fn new(pacing: Duration) -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(5),
            pacing,
        }
    }

    /// Sleep owed before attempt `n` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.pacing
        } else {
            self.step * attempt
        }
    }
}

/// Shared blocking HTTP client with automatic retry on transient failures.
///
/// One instance lives for the whole run so connections are reused across
/// calls. Only GET is exposed; every request this pipeline makes is
/// read-only, which is what makes blanket retries safe.
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(HttpError::Build)?;
        Ok(Self { client, policy })
    }

    /// GET a URL and deserialize the JSON body.
    ///
    /// Transient failures are retried on the policy's schedule; the final
    /// failure is returned with its original cause. A non-retryable
    /// status fails immediately.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, headers: Option<&HeaderMap>) -> Result<T> {
        let mut retries = 0;
        loop {
            match self.attempt(url, headers) {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.policy.max_retries && self.is_transient(&e) => {
                    retries += 1;
                    let delay = self.policy.delay_before(retries);
                    tracing::warn!(
                        "{e}; retry {retries}/{} in {}s",
                        self.policy.max_retries,
                        delay.as_secs()
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt<T: DeserializeOwned>(&self, url: &str, headers: Option<&HeaderMap>) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(headers) = headers {
            request = request.headers(headers.clone());
        }

        let response = request.send().map_err(|source| HttpError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.json().map_err(|source| HttpError::Decode {
            url: url.to_string(),
            source,
        })
    }

    fn is_transient(&self, error: &HttpError) -> bool {
        match error {
            HttpError::Transport { .. } => true,
            HttpError::Status { status, .. } => self.policy.is_retryable(*status),
            HttpError::Decode { .. } | HttpError::Build(_) => false,
        }
    }
}
