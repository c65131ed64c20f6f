//! Batch live-status detection against the Twitch Helix API.
//!
//! `GET /helix/streams` accepts up to 100 `user_id` parameters and returns
//! one entry per broadcaster that is currently live. Broadcasters missing
//! from the response are offline.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{MAX_FETCH_BATCH_SIZE, TwitchConfig};
use crate::credentials::AccessToken;
use crate::{Error, Result};

/// Live broadcasters of one batch: platform user id -> viewer count.
pub type Snapshot = HashMap<String, i64>;

/// Maximum characters of a response body kept in logs.
const PAYLOAD_PREVIEW_CHARS: usize = 500;

/// Header carrying the Unix time at which the rate-limit bucket refills.
const RATELIMIT_RESET_HEADER: &str = "ratelimit-reset";

/// Result of fetching one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The platform answered; absent ids are offline.
    Fetched(Snapshot),
    /// The request failed; the live status of the batch is unknown.
    Failed(BatchFailure),
}

impl BatchOutcome {
    /// Collapse into a mapping where a failed batch looks like nobody is live.
    pub fn into_snapshot(self) -> Snapshot {
        match self {
            Self::Fetched(snapshot) => snapshot,
            Self::Failed(_) => Snapshot::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A failed batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Number of ids in the failed request.
    pub batch_size: usize,
    /// Error message.
    pub error: String,
}

/// Errors raised while fetching a batch. Never leaves this module: the
/// detector turns them into [`BatchOutcome::Failed`].
#[derive(Debug, Error)]
enum FetchError {
    #[error("batch of {0} ids exceeds the per-request limit")]
    BatchTooLarge(usize),

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {preview}")]
    Status { status: StatusCode, preview: String },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    viewer_count: i64,
}

/// Source of live-status snapshots for the poll loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveStatusFetcher: Send + Sync {
    /// Fetch the live status of at most [`MAX_FETCH_BATCH_SIZE`] broadcasters.
    ///
    /// Failures are returned as [`BatchOutcome::Failed`], never as errors.
    async fn fetch_snapshot(&self, ids: &[String], token: &AccessToken) -> BatchOutcome;
}

/// Batch detector for checking many broadcasters in one Helix call.
pub struct BatchDetector {
    /// HTTP client for API requests.
    client: Client,
    /// `{api_base}/helix/streams`.
    streams_url: Url,
    /// Sent as the `Client-Id` header.
    client_id: Option<String>,
    /// Maximum broadcasters per request.
    max_batch_size: usize,
    /// Base delay for rate-limit backoff when no reset header is present.
    retry_delay: Duration,
    /// Maximum retries on rate limit.
    max_retries: u32,
    /// Upper bound on a single rate-limit wait.
    max_rate_limit_wait: Duration,
}

impl BatchDetector {
    /// Create a new batch detector.
    pub fn new(client: Client, config: &TwitchConfig) -> Result<Self> {
        let streams_url = streams_url(&config.api_base_url)
            .map_err(|e| Error::config(format!("invalid Twitch API base URL: {}", e)))?;

        if config.client_id.is_none() {
            warn!("TWITCH_CLIENT_ID is not set; Helix requests will be rejected");
        }

        Ok(Self {
            client,
            streams_url,
            client_id: config.client_id.clone(),
            max_batch_size: MAX_FETCH_BATCH_SIZE,
            retry_delay: Duration::from_secs(2),
            max_retries: 2,
            max_rate_limit_wait: Duration::from_secs(30),
        })
    }

    /// Set the maximum batch size (capped at the platform limit).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, MAX_FETCH_BATCH_SIZE);
        self
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the maximum retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Fetch viewer counts, treating any failure as "nobody in this batch is live".
    pub async fn fetch_liveness(&self, ids: &[String], token: &AccessToken) -> Snapshot {
        self.fetch_snapshot(ids, token).await.into_snapshot()
    }

    /// Check a batch with retry logic.
    async fn check_batch_with_retry(
        &self,
        ids: &[String],
        token: &AccessToken,
    ) -> std::result::Result<Snapshot, FetchError> {
        let mut retries = 0;

        loop {
            match self.check_batch_internal(ids, token).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(FetchError::RateLimited { retry_after }) if retries < self.max_retries => {
                    let delay = retry_after
                        .unwrap_or_else(|| self.calculate_backoff(retries))
                        .min(self.max_rate_limit_wait);
                    warn!(
                        "Rate limited by Helix, retrying in {:?} (attempt {}/{})",
                        delay,
                        retries + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn check_batch_internal(
        &self,
        ids: &[String],
        token: &AccessToken,
    ) -> std::result::Result<Snapshot, FetchError> {
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("user_id", id.as_str())).collect();
        // Helix pages at 20 entries by default.
        let first = ids.len().to_string();
        query.push(("first", first.as_str()));

        let mut request = self
            .client
            .get(self.streams_url.clone())
            .query(&query)
            .bearer_auth(token.secret());
        if let Some(client_id) = &self.client_id {
            request = request.header("Client-Id", client_id);
        }

        let response = request.send().await?;
        let status = response.status();
        let retry_after = rate_limit_reset(response.headers());
        let body = response.text().await?;

        debug!(
            batch_size = ids.len(),
            status = status.as_u16(),
            payload = %preview(&body),
            "Helix streams response"
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                preview: preview(&body),
            });
        }

        let parsed: StreamsResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .data
            .into_iter()
            .filter_map(|entry| {
                let user_id = entry.user_id.filter(|id| !id.is_empty())?;
                Some((user_id, entry.viewer_count.max(0)))
            })
            .collect())
    }

    /// Calculate backoff delay with exponential increase and jitter.
    fn calculate_backoff(&self, retry_count: u32) -> Duration {
        let base_delay = self.retry_delay.as_millis() as u64;
        let exponential_delay = base_delay.saturating_mul(2u64.saturating_pow(retry_count));

        // Add jitter (±25%)
        let jitter_range = exponential_delay / 4;
        let jitter: i64 = if jitter_range > 0 {
            let random_val = rand::random::<u64>() % (jitter_range.saturating_mul(2).max(1));
            random_val as i64 - jitter_range as i64
        } else {
            0
        };

        Duration::from_millis(exponential_delay.saturating_add_signed(jitter))
    }
}

#[async_trait]
impl LiveStatusFetcher for BatchDetector {
    async fn fetch_snapshot(&self, ids: &[String], token: &AccessToken) -> BatchOutcome {
        if ids.is_empty() {
            return BatchOutcome::Fetched(Snapshot::new());
        }

        let result = if ids.len() > self.max_batch_size {
            Err(FetchError::BatchTooLarge(ids.len()))
        } else {
            self.check_batch_with_retry(ids, token).await
        };

        match result {
            Ok(snapshot) => {
                debug!(batch_size = ids.len(), live = snapshot.len(), "Batch check complete");
                BatchOutcome::Fetched(snapshot)
            }
            Err(e) => {
                warn!(batch_size = ids.len(), error = %e, "Batch check failed");
                BatchOutcome::Failed(BatchFailure {
                    batch_size: ids.len(),
                    error: e.to_string(),
                })
            }
        }
    }
}

/// Time until the rate-limit bucket refills, from the `Ratelimit-Reset` header.
fn rate_limit_reset(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let reset_at: i64 = headers
        .get(RATELIMIT_RESET_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let wait = reset_at - chrono::Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

/// Resolve `helix/streams` under the base URL, keeping any path prefix.
fn streams_url(base: &str) -> std::result::Result<Url, url::ParseError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("helix/streams")
}

fn preview(body: &str) -> String {
    body.chars().take(PAYLOAD_PREVIEW_CHARS).collect()
}
