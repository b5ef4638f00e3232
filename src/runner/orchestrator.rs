//! The run loop state machine
//!
//! States: START → PLANNING → FETCHING → WRITING → ADVANCING → (PLANNING |
//! DONE) | FAILED. The checkpoint is advanced only after a durable commit,
//! and only through the store's strictly-increasing guard, so any two
//! interleaved runs leave the destination table contiguous and duplicate
//! free.

use super::config::RunBudget;
use super::RunError;
use crate::checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore};
use crate::config::{IngestConfig, StreamConfig};
use crate::fetcher::{
    fetch_with_retry, FetchError, HttpPartitionFetcher, PartitionFetcher, RequestBudget,
    RetryPolicy,
};
use crate::metrics::{self, RunMetrics};
use crate::planner::PartitionPlanner;
use crate::shutdown::{self, SharedShutdown};
use crate::transform::{IdentityTransform, RecordTransform};
use crate::writer::{CsvTableStore, PartitionWriter, WriteError};
use crate::{Cursor, Partition};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The run finished cleanly (plan exhausted, budget reached, or the
    /// source has nothing new to publish)
    Done,
    /// The run stopped on an error, at a partition boundary, without
    /// corrupting state
    Failed,
    /// The run was cancelled by the host and stopped at a partition boundary
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Why the run reached its terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No partitions remain between the cursor and now
    CaughtUp,
    /// The per-run partition or wall-clock budget was reached
    BudgetExhausted,
    /// The source has not fully published the next window yet
    NoDataYet,
    /// Host-initiated cancellation
    Cancelled,
    /// Transient fetch failures persisted past the attempt bound
    RetriesExhausted,
    /// The source returned a non-retryable response
    PermanentFetchError,
    /// Records could not be transformed
    TransformFailed,
    /// Unresolvable conflict in the destination table
    WriteConflict,
    /// The destination table could not be written
    WriteFailed,
    /// Another run already advanced the checkpoint further (benign)
    StaleCheckpoint,
    /// The checkpoint store failed
    CheckpointUnavailable,
}

impl StopReason {
    /// Stable label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::CaughtUp => "caught_up",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::NoDataYet => "no_data_yet",
            StopReason::Cancelled => "cancelled",
            StopReason::RetriesExhausted => "retries_exhausted",
            StopReason::PermanentFetchError => "permanent_fetch_error",
            StopReason::TransformFailed => "transform_failed",
            StopReason::WriteConflict => "write_conflict",
            StopReason::WriteFailed => "write_failed",
            StopReason::StaleCheckpoint => "stale_checkpoint",
            StopReason::CheckpointUnavailable => "checkpoint_unavailable",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal report of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Stream the run ingested
    pub stream_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Why the run stopped
    pub stop: StopReason,
    /// Error detail for failed runs
    pub detail: Option<String>,
    /// Partitions durably committed by this run
    pub partitions_committed: u64,
    /// Records written by this run
    pub records_written: u64,
    /// The stream's cursor when the run ended
    pub final_cursor: Cursor,
}

/// Callback invoked after every durable partition commit.
pub type CommitHook = Box<dyn Fn(&Partition, u64) + Send + Sync>;

/// Drives the checkpointed incremental-fetch loop for one stream.
pub struct Orchestrator {
    stream: StreamConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    fetcher: Arc<dyn PartitionFetcher>,
    writer: Arc<dyn PartitionWriter>,
    transform: Arc<dyn RecordTransform>,
    retry: RetryPolicy,
    shutdown: Option<SharedShutdown>,
    as_of: Option<Cursor>,
    on_commit: Option<CommitHook>,
}

impl Orchestrator {
    /// Assemble an orchestrator from explicit collaborators.
    pub fn new(
        stream: StreamConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        fetcher: Arc<dyn PartitionFetcher>,
        writer: Arc<dyn PartitionWriter>,
    ) -> Self {
        let retry = RetryPolicy::with_max_attempts(stream.rate.max_attempts);
        Self {
            stream,
            checkpoints,
            fetcher,
            writer,
            transform: Arc::new(IdentityTransform),
            retry,
            shutdown: shutdown::get_global_shutdown(),
            as_of: None,
            on_commit: None,
        }
    }

    /// Assemble the production wiring for one configured stream: file
    /// checkpoint store, HTTP fetcher, CSV table store.
    pub fn from_config(config: &IngestConfig, stream: &StreamConfig) -> Result<Self, RunError> {
        stream.validate()?;

        let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint_dir)?);
        let fetcher = Arc::new(HttpPartitionFetcher::new(
            &stream.id,
            &stream.source_url,
            RequestBudget::from_requests_per_minute(stream.rate.max_requests_per_minute),
            Duration::from_secs(stream.rate.request_timeout_secs),
        )?);
        let writer = Arc::new(CsvTableStore::new(&config.table_root)?);

        Ok(Self::new(stream.clone(), checkpoints, fetcher, writer))
    }

    /// Replace the identity transform.
    pub fn with_transform(mut self, transform: Arc<dyn RecordTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Plan against a fixed "now" instead of the wall clock.
    pub fn with_as_of(mut self, as_of: Cursor) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Invoke a hook after every durable partition commit.
    pub fn with_on_commit(mut self, hook: CommitHook) -> Self {
        self.on_commit = Some(hook);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    fn effective_now(&self) -> Cursor {
        self.as_of
            .unwrap_or_else(|| Cursor::from_millis(chrono::Utc::now().timestamp_millis()))
    }

    /// Execute one run under the given budget.
    ///
    /// Always returns a terminal report; failures are reported, not raised,
    /// so a scheduler can re-invoke on any cadence without special casing.
    pub async fn run(&self, budget: RunBudget) -> RunReport {
        let span = info_span!(
            "ingest_run",
            stream_id = %self.stream.id,
            granularity = %self.stream.granularity,
            max_partitions = budget.max_partitions,
        );
        self.run_inner(budget).instrument(span).await
    }

    async fn run_inner(&self, budget: RunBudget) -> RunReport {
        let run_metrics = RunMetrics::start(&self.stream.id);
        let started = Instant::now();

        let mut partitions_committed: u64 = 0;
        let mut records_written: u64 = 0;

        // START: load the stream's checkpoint.
        let mut checkpoint = match self
            .checkpoints
            .load(&self.stream.id, self.stream.epoch_cursor())
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                return self.finish(
                    &run_metrics,
                    RunStatus::Failed,
                    StopReason::CheckpointUnavailable,
                    Some(e.to_string()),
                    partitions_committed,
                    records_written,
                    self.stream.epoch_cursor(),
                );
            }
        };

        // Planning is a pure function of (checkpoint, now); now is pinned
        // once so a long run never chases the clock into freshly published
        // windows.
        let now = self.effective_now();
        let planner = PartitionPlanner::new(self.stream.id.clone(), self.stream.granularity);

        info!(
            cursor = %checkpoint.cursor(),
            now = %now,
            "Run starting from checkpoint"
        );

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested - stopping at partition boundary");
                return self.finish(
                    &run_metrics,
                    RunStatus::Cancelled,
                    StopReason::Cancelled,
                    None,
                    partitions_committed,
                    records_written,
                    checkpoint.cursor(),
                );
            }

            if partitions_committed >= u64::from(budget.max_partitions)
                || started.elapsed() >= budget.max_runtime
            {
                return self.finish(
                    &run_metrics,
                    RunStatus::Done,
                    StopReason::BudgetExhausted,
                    None,
                    partitions_committed,
                    records_written,
                    checkpoint.cursor(),
                );
            }

            // PLANNING: oldest remaining partition first.
            let remaining = budget.max_partitions as usize - partitions_committed as usize;
            let plan = planner.plan(&checkpoint, now, remaining);
            let partition = match plan.into_iter().next() {
                Some(partition) => partition,
                None => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Done,
                        StopReason::CaughtUp,
                        None,
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
            };

            debug!(partition = %partition, "Fetching partition");

            // FETCHING
            let batch = match fetch_with_retry(self.fetcher.as_ref(), &partition, &self.retry).await
            {
                Ok(batch) => batch,
                Err(FetchError::NoDataYet) => {
                    info!(
                        partition = %partition,
                        "Window not yet published - stopping cleanly"
                    );
                    return self.finish(
                        &run_metrics,
                        RunStatus::Done,
                        StopReason::NoDataYet,
                        None,
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
                Err(FetchError::Permanent(reason)) => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::PermanentFetchError,
                        Some(reason),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
                Err(e) => {
                    // Transient (retries exhausted) or a stray RateLimited.
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::RetriesExhausted,
                        Some(e.to_string()),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
            };

            let fetched = batch.records.len();
            let records = match self.transform.apply(batch.records) {
                Ok(records) => records,
                Err(e) => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::TransformFailed,
                        Some(e.to_string()),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
            };
            if records.len() != fetched {
                debug!(
                    transform = self.transform.name(),
                    input = fetched,
                    output = records.len(),
                    "Transform changed record count"
                );
            }

            // WRITING: durable before the call returns.
            let outcome = match self.writer.commit(&partition, &records) {
                Ok(outcome) => outcome,
                Err(WriteError::Conflict(reason)) => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::WriteConflict,
                        Some(reason),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
                Err(e) => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::WriteFailed,
                        Some(e.to_string()),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
            };

            // ADVANCING: only now may the cursor move, and only forward.
            checkpoint = match self.checkpoints.advance(&self.stream.id, partition.range_end) {
                Ok(checkpoint) => checkpoint,
                Err(CheckpointError::Stale {
                    stored, attempted, ..
                }) => {
                    // A concurrent run already progressed past this
                    // partition; its commit and ours are identical by
                    // idempotence, so nothing is lost by stopping here.
                    warn!(
                        partition = %partition,
                        stored = %stored,
                        attempted = %attempted,
                        "Checkpoint already advanced by a concurrent run"
                    );
                    metrics::record_stale_checkpoint(&self.stream.id);
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::StaleCheckpoint,
                        Some(format!(
                            "stored cursor {stored} is already past {attempted}"
                        )),
                        partitions_committed,
                        records_written,
                        stored,
                    );
                }
                Err(e) => {
                    return self.finish(
                        &run_metrics,
                        RunStatus::Failed,
                        StopReason::CheckpointUnavailable,
                        Some(e.to_string()),
                        partitions_committed,
                        records_written,
                        checkpoint.cursor(),
                    );
                }
            };

            partitions_committed += 1;
            records_written += outcome.rows_written;
            run_metrics.record_commit(outcome.rows_written);
            if let Some(hook) = &self.on_commit {
                hook(&partition, outcome.rows_written);
            }

            info!(
                partition = %partition,
                rows = outcome.rows_written,
                replaced = outcome.replaced,
                cursor = %checkpoint.cursor(),
                "Partition committed and checkpoint advanced"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_metrics: &RunMetrics,
        status: RunStatus,
        stop: StopReason,
        detail: Option<String>,
        partitions_committed: u64,
        records_written: u64,
        final_cursor: Cursor,
    ) -> RunReport {
        match status {
            RunStatus::Done => run_metrics.record_done(partitions_committed),
            RunStatus::Failed => run_metrics.record_failure(stop.as_str()),
            RunStatus::Cancelled => {
                info!(
                    partitions = partitions_committed,
                    "Run cancelled at partition boundary"
                );
            }
        }

        RunReport {
            stream_id: self.stream.id.clone(),
            status,
            stop,
            detail,
            partitions_committed,
            records_written,
            final_cursor,
        }
    }
}
