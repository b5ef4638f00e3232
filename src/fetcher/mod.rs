//! Rate-limited partition fetchers
//!
//! A fetcher retrieves one partition's worth of remote data. Failures are
//! classified so the run loop can react correctly: rate-limit pushback and
//! transient faults are retried with bounded backoff, unpublished windows
//! stop the run cleanly, malformed responses abort it.

use crate::metrics;
use crate::{FetchBatch, Partition};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub mod http;
pub mod rate_limit;

pub use http::HttpPartitionFetcher;
pub use rate_limit::{RequestBudget, RetryPolicy};

/// Fetch failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source signalled a rate limit; retried in-run with backoff.
    #[error("rate limited by source")]
    RateLimited {
        /// Source-suggested wait before retrying, if provided
        retry_after: Option<Duration>,
    },

    /// Recoverable fault (network, 5xx). Retried in-run; surfaced after the
    /// attempt bound is exhausted, with no checkpoint change.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Non-retryable fault (malformed response, client error). Aborts the
    /// run without advancing any checkpoint.
    #[error("permanent fetch error: {0}")]
    Permanent(String),

    /// The queried window is not fully published yet. Not a failure: the
    /// run stops cleanly and the next invocation retries the same window.
    #[error("partition data not yet published")]
    NoDataYet,
}

/// Result type for fetcher operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Retrieves one partition of remote data.
#[async_trait]
pub trait PartitionFetcher: Send + Sync {
    /// Fetch all records in the partition's time range.
    ///
    /// A single call may issue several paced upstream requests (pagination)
    /// but represents one logical unit of retrieval: it either yields the
    /// whole window or fails as a unit.
    async fn fetch(&self, partition: &Partition) -> FetchResult<FetchBatch>;

    /// Identifier of the backing source, for logging.
    fn source_id(&self) -> &str;
}

/// Fetch a partition with bounded retries.
///
/// `RateLimited` and `Transient` outcomes are retried up to the policy's
/// attempt bound, honoring a source-provided `Retry-After` over the
/// computed backoff. `NoDataYet` and `Permanent` propagate immediately.
/// Exhausting the bound yields `Transient`, so the caller fails the run
/// without touching the checkpoint and the next run retries the same
/// partition.
pub async fn fetch_with_retry(
    fetcher: &dyn PartitionFetcher,
    partition: &Partition,
    policy: &RetryPolicy,
) -> FetchResult<FetchBatch> {
    let mut attempt: u32 = 0;
    let mut last_error: Option<FetchError> = None;

    loop {
        attempt += 1;

        match fetcher.fetch(partition).await {
            Ok(batch) => {
                debug!(
                    partition = %partition,
                    records = batch.len(),
                    attempt = attempt,
                    "Partition fetched"
                );
                return Ok(batch);
            }
            Err(FetchError::RateLimited { retry_after }) => {
                metrics::record_rate_limited(fetcher.source_id());
                if !policy.allows_retry(attempt) {
                    last_error = Some(FetchError::RateLimited { retry_after });
                    break;
                }
                let backoff = retry_after.unwrap_or_else(|| policy.backoff_for_attempt(attempt));
                warn!(
                    partition = %partition,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limit signal, backing off"
                );
                metrics::record_retry_backoff(backoff, attempt);
                tokio::time::sleep(backoff).await;
            }
            Err(FetchError::Transient(reason)) => {
                if !policy.allows_retry(attempt) {
                    last_error = Some(FetchError::Transient(reason));
                    break;
                }
                let backoff = policy.backoff_for_attempt(attempt);
                warn!(
                    partition = %partition,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %reason,
                    "Transient fetch error, backing off"
                );
                metrics::record_retry_backoff(backoff, attempt);
                tokio::time::sleep(backoff).await;
            }
            // Clean-stop and abort signals are never retried here.
            Err(other) => return Err(other),
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown fetch error".to_string());
    Err(FetchError::Transient(format!(
        "retries exhausted after {} attempts: {reason}",
        policy.max_attempts
    )))
}
