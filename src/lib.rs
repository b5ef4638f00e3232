//! # Incremental Ingestor Library
//!
//! A library for incremental, resumable ingestion of time-partitioned public
//! data into a durable table store. Designed for rate-limited sources and
//! hosts that repeatedly re-launch short-lived runs (schedulers, notebooks,
//! cron), where every invocation must be safe to interrupt and repeat.
//!
//! ## Features
//!
//! - **Checkpointed Progress**: Per-stream cursors persisted atomically, with
//!   a strictly-increasing advance guard against concurrent runs
//! - **Rate-Limit Aware Fetching**: Request budgets, bounded retries, and
//!   capped exponential backoff with jitter
//! - **Idempotent Commits**: Replace-by-partition table writes that are safe
//!   to repeat after any interruption
//! - **Bounded Runs**: Every run terminates within a partition/wall-clock
//!   budget, well before any host-imposed timeout
//! - **Multi-Stream**: Independent checkpoints and rate budgets per stream
//!
//! ## Quick Start
//!
//! ```no_run
//! use incremental_ingestor::config::IngestConfig;
//! use incremental_ingestor::runner::{Orchestrator, RunBudget};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::load("ingest.json".as_ref())?;
//! let stream = config.stream("taxi_trips").expect("stream configured");
//!
//! let orchestrator = Orchestrator::from_config(&config, stream)?;
//! let report = orchestrator
//!     .run(RunBudget::new(24, Duration::from_secs(600)))
//!     .await;
//!
//! println!("{}: {} partitions committed", report.status, report.partitions_committed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`checkpoint`] - Durable per-stream cursors with compare-and-advance
//! - [`fetcher`] - Rate-limited retrieval of one partition of remote data
//! - [`planner`] - Computes the ordered partitions still to be ingested
//! - [`writer`] - Idempotent replace-by-partition table commits
//! - [`runner`] - The run loop driving plan → fetch → write → advance
//! - [`transform`] - Pluggable record transformation between fetch and write
//! - [`config`] - Stream and destination configuration
//!
//! ## Resumability Contract
//!
//! A run always reaches a terminal status (`Done`, `Failed`, or `Cancelled`)
//! and never advances a checkpoint past data that was not durably committed.
//! Re-invoking the run loop after any outcome resumes from the last durable
//! checkpoint with no duplicates and no gaps.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Durable per-stream checkpoints
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Stream and destination configuration
pub mod config;

/// Rate-limited partition fetchers
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Partition planning
pub mod planner;

/// Run loop orchestration
pub mod runner;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Record transformation between fetch and write
pub mod transform;

/// Idempotent table writers
pub mod writer;

// Re-export commonly used types
pub use planner::Granularity;
pub use runner::{Orchestrator, RunBudget, RunReport, RunStatus, StopReason};

/// An opaque, totally-ordered position in a stream's time domain.
///
/// Stored in checkpoints as the exclusive upper bound of data already
/// committed. Internally a Unix timestamp in milliseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    /// Create a cursor from a Unix timestamp in milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The cursor position as Unix milliseconds.
    pub fn millis(&self) -> i64 {
        self.0
    }

    /// Offset the cursor forward by a number of milliseconds.
    pub fn advance_by(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Compact UTC representation used in partition keys (e.g. `20240105T000000Z`).
    pub fn to_compact_utc(&self) -> String {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            None => format!("ms{}", self.0),
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// A half-open, non-overlapping slice `[range_start, range_end)` of one
/// stream's time domain.
///
/// Partitions committed for a stream always form a contiguous prefix from
/// the stream's epoch to its checkpoint cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Stream this partition belongs to
    pub stream_id: String,
    /// Start of the slice (inclusive)
    pub range_start: Cursor,
    /// End of the slice (exclusive)
    pub range_end: Cursor,
}

impl Partition {
    /// Create a new partition slice.
    pub fn new(stream_id: impl Into<String>, range_start: Cursor, range_end: Cursor) -> Self {
        Self {
            stream_id: stream_id.into(),
            range_start,
            range_end,
        }
    }

    /// Stable key identifying this partition in the destination table,
    /// e.g. `20240105T000000Z-20240106T000000Z`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}",
            self.range_start.to_compact_utc(),
            self.range_end.to_compact_utc()
        )
    }

    /// Width of the slice in milliseconds.
    pub fn width_millis(&self) -> i64 {
        self.range_end.millis() - self.range_start.millis()
    }

    /// Validate partition integrity.
    pub fn validate(&self) -> Result<(), String> {
        if self.stream_id.is_empty() {
            return Err("Stream id cannot be empty".to_string());
        }

        if self.range_end <= self.range_start {
            return Err(format!(
                "Range end ({}) must be after range start ({})",
                self.range_end, self.range_start
            ));
        }

        Ok(())
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}, {})",
            self.stream_id, self.range_start, self.range_end
        )
    }
}

/// One ingested row: an event timestamp, a source-assigned key, and an
/// arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Event time (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Source-assigned record key, unique within a partition
    pub key: String,
    /// Remaining source fields, passed through untouched
    pub payload: serde_json::Value,
}

impl Record {
    /// Validate record integrity.
    pub fn validate(&self) -> Result<(), String> {
        if self.timestamp <= 0 {
            return Err(format!(
                "Timestamp must be positive, got {}",
                self.timestamp
            ));
        }

        if self.key.is_empty() {
            return Err("Record key cannot be empty".to_string());
        }

        Ok(())
    }

    /// Whether the record's event time falls inside the given partition.
    pub fn belongs_to(&self, partition: &Partition) -> bool {
        self.timestamp >= partition.range_start.millis()
            && self.timestamp < partition.range_end.millis()
    }
}

/// The result of fetching one partition from the remote source.
///
/// Produced by a [`fetcher::PartitionFetcher`], consumed immediately by a
/// [`writer::PartitionWriter`], never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBatch {
    /// Records in the fetched window, in source order
    pub records: Vec<Record>,
    /// Whether the source reports the queried window as fully published
    pub complete: bool,
    /// Number of upstream requests this fetch consumed
    pub requests_used: u32,
}

impl FetchBatch {
    /// A complete batch with the given records.
    pub fn complete(records: Vec<Record>, requests_used: u32) -> Self {
        Self {
            records,
            complete: true,
            requests_used,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
