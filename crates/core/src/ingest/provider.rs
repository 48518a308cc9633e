use crate::config::Settings;
use crate::domain::request::{Interval, RetrySettings};
use crate::domain::series::{NormalizedSeries, SourceTag};
use crate::ingest::error::FetchError;
use crate::time::dates::DateRange;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) marketslice/0.1";

/// One upstream market-data source behind a uniform fetch contract.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceTag;

    async fn fetch(
        &self,
        ticker: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<NormalizedSeries, FetchError>;
}

/// Shared HTTP client for both adapters; the timeout bounds every upstream call.
pub fn build_http_client(settings: &Settings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.upstream_timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build upstream http client")
}

/// Appends `segments` to the base URL's path. Each segment is percent-encoded as a
/// whole, so a ticker can never add path levels or a query string.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, FetchError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| FetchError::SourceUnavailable(format!("invalid base url {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::SourceUnavailable(format!("base url {base:?} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Bounded retry with exponential backoff (`base * 2^attempt`, no jitter).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_base,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Runs `op` until it succeeds or the attempts are exhausted. The final failure
    /// is wrapped in [`FetchError::UpstreamFetchFailed`].
    pub async fn run<T, F, Fut>(&self, ticker: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt + 1 >= self.attempts {
                        return Err(FetchError::UpstreamFetchFailed {
                            last_error: Box::new(err),
                        });
                    }
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        %ticker,
                        attempt,
                        ?backoff,
                        error = %err,
                        "upstream fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        Self::new(s.retries, s.backoff_base)
    }
}
