//! Observability metrics for the ingestion orchestrator
//!
//! Tracks run outcomes, partition commits, upstream request behavior
//! (429s, retries, backoff), and checkpoint contention.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate for low-overhead collection
//! - Prometheus exporter for a scraping endpoint when enabled
//! - Safe to call before initialization: recordings become no-ops

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics with a Prometheus exporter.
///
/// Call once at startup; repeated calls are no-ops.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "fetch_requests_total",
        Unit::Count,
        "Total upstream requests issued by partition fetchers"
    );

    describe_counter!(
        "fetch_rate_limited_total",
        Unit::Count,
        "Total rate-limit signals received from the source"
    );

    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Total fetch retry attempts"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of fetch retry backoff in seconds"
    );

    describe_counter!(
        "partitions_committed_total",
        Unit::Count,
        "Total partitions durably committed to the destination table"
    );

    describe_counter!(
        "records_written_total",
        Unit::Count,
        "Total records written to the destination table"
    );

    describe_counter!(
        "checkpoint_stale_total",
        Unit::Count,
        "Total checkpoint advances rejected because another run progressed first"
    );

    describe_counter!(
        "runs_completed_total",
        Unit::Count,
        "Total runs that reached Done"
    );

    describe_counter!(
        "runs_failed_total",
        Unit::Count,
        "Total runs that reached Failed"
    );

    describe_histogram!(
        "run_duration_seconds",
        Unit::Seconds,
        "Wall-clock duration of one run"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record one upstream request and its HTTP status.
pub fn record_fetch_request(source: &str, status: u16) {
    counter!(
        "fetch_requests_total",
        "source" => source.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record a rate-limit signal from the source.
pub fn record_rate_limited(source: &str) {
    counter!(
        "fetch_rate_limited_total",
        "source" => source.to_string(),
    )
    .increment(1);
}

/// Record a fetch retry and the backoff applied before it.
pub fn record_retry_backoff(backoff: Duration, attempt: u32) {
    counter!(
        "fetch_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(backoff.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = backoff.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record a checkpoint advance rejected by the strictly-increasing guard.
pub fn record_stale_checkpoint(stream_id: &str) {
    counter!(
        "checkpoint_stale_total",
        "stream" => stream_id.to_string(),
    )
    .increment(1);
}

/// Per-run metrics guard.
pub struct RunMetrics {
    stream_id: String,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run for a stream.
    pub fn start(stream_id: impl Into<String>) -> Self {
        let stream_id = stream_id.into();
        info!(stream_id = %stream_id, "Run started");
        Self {
            stream_id,
            start_time: Instant::now(),
        }
    }

    /// Record one committed partition.
    pub fn record_commit(&self, records: u64) {
        counter!(
            "partitions_committed_total",
            "stream" => self.stream_id.clone(),
        )
        .increment(1);

        counter!(
            "records_written_total",
            "stream" => self.stream_id.clone(),
        )
        .increment(records);
    }

    /// Record a run that reached `Done`.
    pub fn record_done(&self, partitions: u64) {
        let duration = self.start_time.elapsed();

        counter!(
            "runs_completed_total",
            "stream" => self.stream_id.clone(),
        )
        .increment(1);
        histogram!("run_duration_seconds", "stream" => self.stream_id.clone())
            .record(duration.as_secs_f64());

        info!(
            stream_id = %self.stream_id,
            partitions = partitions,
            duration_secs = duration.as_secs(),
            "Run completed successfully"
        );
    }

    /// Record a run that reached `Failed`.
    pub fn record_failure(&self, reason: &str) {
        let duration = self.start_time.elapsed();

        counter!(
            "runs_failed_total",
            "stream" => self.stream_id.clone(),
            "reason" => reason.to_string(),
        )
        .increment(1);
        histogram!("run_duration_seconds", "stream" => self.stream_id.clone())
            .record(duration.as_secs_f64());

        error!(
            stream_id = %self.stream_id,
            reason = %reason,
            duration_secs = duration.as_secs(),
            "Run failed"
        );
    }
}
