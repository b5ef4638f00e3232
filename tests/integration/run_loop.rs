//! End-to-end run loop tests against the real file-backed stores

use async_trait::async_trait;
use incremental_ingestor::checkpoint::{CheckpointStore, FileCheckpointStore};
use incremental_ingestor::config::{RateLimitConfig, StreamConfig};
use incremental_ingestor::fetcher::{FetchError, PartitionFetcher, RetryPolicy};
use incremental_ingestor::planner::Granularity;
use incremental_ingestor::runner::{Orchestrator, RunBudget, RunStatus, StopReason};
use incremental_ingestor::writer::CsvTableStore;
use incremental_ingestor::{Cursor, FetchBatch, Partition, Record};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DAY: i64 = 86_400_000;

fn day(n: i64) -> Cursor {
    Cursor::from_millis(n * DAY)
}

fn stream() -> StreamConfig {
    StreamConfig {
        id: "trips".to_string(),
        source_url: "https://data.example.com/v1/trips".to_string(),
        epoch: chrono::DateTime::from_timestamp_millis(0).unwrap(),
        granularity: Granularity::OneDay,
        rate: RateLimitConfig::default(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// Deterministic source: two records per day partition.
struct SyntheticSource;

#[async_trait]
impl PartitionFetcher for SyntheticSource {
    async fn fetch(&self, partition: &Partition) -> Result<FetchBatch, FetchError> {
        let start = partition.range_start.millis();
        Ok(FetchBatch::complete(
            vec![
                Record {
                    timestamp: start + 1_000,
                    key: format!("{}-a", start / DAY),
                    payload: serde_json::json!({"value": start / DAY}),
                },
                Record {
                    timestamp: start + 2_000,
                    key: format!("{}-b", start / DAY),
                    payload: serde_json::json!({"value": start / DAY + 100}),
                },
            ],
            1,
        ))
    }

    fn source_id(&self) -> &str {
        "synthetic"
    }
}

struct Fixture {
    _dir: TempDir,
    checkpoints: Arc<FileCheckpointStore>,
    table: Arc<CsvTableStore>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let checkpoints =
            Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")).unwrap());
        let table = Arc::new(CsvTableStore::new(dir.path().join("table")).unwrap());
        Self {
            _dir: dir,
            checkpoints,
            table,
        }
    }

    fn orchestrator(&self, fetcher: Arc<dyn PartitionFetcher>, as_of: Cursor) -> Orchestrator {
        Orchestrator::new(
            stream(),
            self.checkpoints.clone(),
            fetcher,
            self.table.clone(),
        )
        .with_retry_policy(fast_retry())
        .with_as_of(as_of)
    }
}

#[tokio::test]
async fn test_sequential_runs_build_contiguous_prefix() {
    let fixture = Fixture::new();
    let orch = fixture.orchestrator(Arc::new(SyntheticSource), day(10));

    // Three budgeted runs: 4 + 4 + 2 partitions.
    let budget = RunBudget::new(4, Duration::from_secs(60));
    let first = orch.run(budget).await;
    assert_eq!(first.status, RunStatus::Done);
    assert_eq!(first.stop, StopReason::BudgetExhausted);
    assert_eq!(first.final_cursor, day(4));

    let second = orch.run(budget).await;
    assert_eq!(second.final_cursor, day(8));

    let third = orch.run(budget).await;
    assert_eq!(third.status, RunStatus::Done);
    assert_eq!(third.stop, StopReason::CaughtUp);
    assert_eq!(third.final_cursor, day(10));
    assert_eq!(third.partitions_committed, 2);

    // The table holds exactly the contiguous prefix [epoch, cursor).
    let keys = fixture.table.list_partitions("trips").unwrap();
    assert_eq!(keys.len(), 10);
    for n in 0..10 {
        let partition = Partition::new("trips", day(n), day(n + 1));
        assert!(keys.contains(&partition.key()));
        let records = fixture.table.read_partition(&partition).unwrap();
        assert_eq!(records.len(), 2);
        for record in records {
            assert!(record.belongs_to(&partition));
        }
    }

    // A fourth run has nothing to do and changes nothing.
    let fourth = orch.run(budget).await;
    assert_eq!(fourth.stop, StopReason::CaughtUp);
    assert_eq!(fourth.partitions_committed, 0);
    assert_eq!(fixture.table.list_partitions("trips").unwrap().len(), 10);
}

#[tokio::test]
async fn test_reingest_after_reset_reproduces_identical_table() {
    let fixture = Fixture::new();
    let orch = fixture.orchestrator(Arc::new(SyntheticSource), day(5));

    let report = orch.run(RunBudget::new(10, Duration::from_secs(60))).await;
    assert_eq!(report.final_cursor, day(5));

    let partition = Partition::new("trips", day(2), day(3));
    let before = fixture.table.read_partition(&partition).unwrap();

    // Wipe the checkpoint and ingest everything again.
    fixture.checkpoints.reset("trips").unwrap();
    let report = orch.run(RunBudget::new(10, Duration::from_secs(60))).await;
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.partitions_committed, 5);

    // Same partitions, same content: no duplicates from the repeat.
    assert_eq!(fixture.table.list_partitions("trips").unwrap().len(), 5);
    let after = fixture.table.read_partition(&partition).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_no_data_yet_stops_cleanly_at_unpublished_window() {
    /// Publishes days 0-4; day 5 onward is not out yet.
    struct PartiallyPublished;

    #[async_trait]
    impl PartitionFetcher for PartiallyPublished {
        async fn fetch(&self, partition: &Partition) -> Result<FetchBatch, FetchError> {
            if partition.range_start >= day(5) {
                return Err(FetchError::NoDataYet);
            }
            SyntheticSource.fetch(partition).await
        }

        fn source_id(&self) -> &str {
            "partial"
        }
    }

    let fixture = Fixture::new();
    let orch = fixture.orchestrator(Arc::new(PartiallyPublished), day(8));

    let report = orch.run(RunBudget::new(24, Duration::from_secs(60))).await;
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.stop, StopReason::NoDataYet);
    assert_eq!(report.partitions_committed, 5);
    assert_eq!(report.final_cursor, day(5));

    // Checkpoint sits exactly at the unpublished boundary.
    let checkpoint = fixture.checkpoints.load("trips", day(0)).unwrap();
    assert_eq!(checkpoint.cursor(), day(5));

    // Re-running makes no further progress and stays clean.
    let again = orch.run(RunBudget::new(24, Duration::from_secs(60))).await;
    assert_eq!(again.status, RunStatus::Done);
    assert_eq!(again.stop, StopReason::NoDataYet);
    assert_eq!(again.partitions_committed, 0);
}

#[tokio::test]
async fn test_failed_run_resumes_from_last_durable_checkpoint() {
    /// Day 3 is served malformed until the source is "fixed".
    struct FlakyDay3 {
        fixed: AtomicBool,
    }

    #[async_trait]
    impl PartitionFetcher for FlakyDay3 {
        async fn fetch(&self, partition: &Partition) -> Result<FetchBatch, FetchError> {
            if partition.range_start == day(3) && !self.fixed.load(Ordering::SeqCst) {
                return Err(FetchError::Permanent("malformed body".to_string()));
            }
            SyntheticSource.fetch(partition).await
        }

        fn source_id(&self) -> &str {
            "flaky-day3"
        }
    }

    let fixture = Fixture::new();
    let fetcher = Arc::new(FlakyDay3 {
        fixed: AtomicBool::new(false),
    });
    let orch = fixture.orchestrator(fetcher.clone(), day(6));

    let report = orch.run(RunBudget::new(24, Duration::from_secs(60))).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.stop, StopReason::PermanentFetchError);
    assert_eq!(report.partitions_committed, 3);
    assert_eq!(report.final_cursor, day(3));

    // Source fixed: the next scheduled invocation completes the gap with
    // zero manual intervention and no duplicate data.
    fetcher.fixed.store(true, Ordering::SeqCst);
    let report = orch.run(RunBudget::new(24, Duration::from_secs(60))).await;
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.partitions_committed, 3);
    assert_eq!(report.final_cursor, day(6));

    let keys = fixture.table.list_partitions("trips").unwrap();
    assert_eq!(keys.len(), 6);
}

#[tokio::test]
async fn test_run_terminates_within_wall_clock_budget() {
    /// Source that takes ~20ms per partition.
    struct SlowSource;

    #[async_trait]
    impl PartitionFetcher for SlowSource {
        async fn fetch(&self, partition: &Partition) -> Result<FetchBatch, FetchError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            SyntheticSource.fetch(partition).await
        }

        fn source_id(&self) -> &str {
            "slow"
        }
    }

    let fixture = Fixture::new();
    let orch = fixture.orchestrator(Arc::new(SlowSource), day(1000));

    let report = orch
        .run(RunBudget::new(1_000, Duration::from_millis(100)))
        .await;

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.stop, StopReason::BudgetExhausted);
    // Far fewer than the gap; the wall clock cut it off.
    assert!(report.partitions_committed < 1_000);
    assert!(report.partitions_committed >= 1);
}
