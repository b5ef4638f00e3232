//! Request budgets and retry backoff
//!
//! A [`RequestBudget`] spaces upstream requests evenly across a run so the
//! source's rate limit is respected proactively. A [`RetryPolicy`] governs
//! what happens when the source pushes back anyway: capped exponential
//! backoff with deterministic jitter, bounded attempts.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default bound on fetch attempts per partition.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default backoff cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded-retry policy with capped exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum fetch attempts per partition (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bound and default delays.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff delay before retrying after the given 1-indexed attempt.
    ///
    /// Doubles per attempt, capped at `max_backoff`, with up to 25%
    /// deterministic jitter so concurrent streams do not retry in lockstep.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as u64;
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped_ms = base_ms
            .saturating_mul(exp)
            .min(self.max_backoff.as_millis() as u64);

        // Golden-ratio sequence stands in for an RNG: well distributed per
        // attempt, reproducible in tests.
        let phase = (attempt as f64 * 0.618_033_988_749_895) % 1.0;
        let jitter_ms = ((capped_ms / 4) as f64 * phase) as u64;

        Duration::from_millis(capped_ms.saturating_add(jitter_ms))
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Spaces requests a minimum interval apart, shared across all fetch calls
/// within a run.
pub struct RequestBudget {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestBudget {
    /// Budget with an explicit minimum inter-request interval.
    pub fn with_min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Budget derived from a requests-per-minute limit. A limit of 0 means
    /// unthrottled.
    pub fn from_requests_per_minute(max_requests_per_minute: u32) -> Self {
        let min_interval = if max_requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(60_000 / u64::from(max_requests_per_minute))
        };
        Self::with_min_interval(min_interval)
    }

    /// The enforced minimum interval between requests.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request is allowed, then claim the slot.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                let wait = ready_at - now;
                debug!(wait_ms = wait.as_millis() as u64, "Pacing upstream request");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
