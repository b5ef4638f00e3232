//! Rate-limit handling through the full run loop

use async_trait::async_trait;
use incremental_ingestor::checkpoint::{CheckpointStore, FileCheckpointStore};
use incremental_ingestor::config::{RateLimitConfig, StreamConfig};
use incremental_ingestor::fetcher::{FetchError, PartitionFetcher, RequestBudget, RetryPolicy};
use incremental_ingestor::planner::Granularity;
use incremental_ingestor::runner::{Orchestrator, RunBudget, RunStatus, StopReason};
use incremental_ingestor::writer::CsvTableStore;
use incremental_ingestor::{Cursor, FetchBatch, Partition, Record};
use std::sync::atomic::{AtomicU32, Ordering};
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

/// Source that throttles the first `limit_count` calls, then recovers.
struct ThrottlingSource {
    limit_count: u32,
    calls: AtomicU32,
}

#[async_trait]
impl PartitionFetcher for ThrottlingSource {
    async fn fetch(&self, partition: &Partition) -> Result<FetchBatch, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.limit_count {
            return Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_millis(2)),
            });
        }
        Ok(FetchBatch::complete(
            vec![Record {
                timestamp: partition.range_start.millis() + 1,
                key: "row".to_string(),
                payload: serde_json::Value::Null,
            }],
            1,
        ))
    }

    fn source_id(&self) -> &str {
        "throttling"
    }
}

fn fixture() -> (TempDir, Arc<FileCheckpointStore>, Arc<CsvTableStore>) {
    let dir = TempDir::new().unwrap();
    let checkpoints = Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")).unwrap());
    let table = Arc::new(CsvTableStore::new(dir.path().join("table")).unwrap());
    (dir, checkpoints, table)
}

#[tokio::test]
async fn test_three_rate_limit_signals_then_success_commits_once() {
    let (_dir, checkpoints, table) = fixture();
    checkpoints.advance("trips", day(5)).unwrap();

    let fetcher = Arc::new(ThrottlingSource {
        limit_count: 3,
        calls: AtomicU32::new(0),
    });

    let orch = Orchestrator::new(stream(), checkpoints.clone(), fetcher.clone(), table.clone())
        .with_retry_policy(RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        })
        .with_as_of(day(6));

    let report = orch.run(RunBudget::new(1, Duration::from_secs(60))).await;

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.partitions_committed, 1);
    assert_eq!(report.final_cursor, day(6));
    // 3 throttled attempts + 1 success
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);

    // Exactly one copy of the partition landed.
    let records = table
        .read_partition(&Partition::new("trips", day(5), day(6)))
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_persistent_throttling_fails_run_without_advancing() {
    let (_dir, checkpoints, table) = fixture();
    checkpoints.advance("trips", day(5)).unwrap();

    let fetcher = Arc::new(ThrottlingSource {
        limit_count: u32::MAX,
        calls: AtomicU32::new(0),
    });

    let orch = Orchestrator::new(stream(), checkpoints.clone(), fetcher.clone(), table.clone())
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        })
        .with_as_of(day(6));

    let report = orch.run(RunBudget::new(1, Duration::from_secs(60))).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.stop, StopReason::RetriesExhausted);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);

    // No checkpoint movement, no partial table state.
    assert_eq!(checkpoints.load("trips", day(0)).unwrap().cursor(), day(5));
    assert!(table.list_partitions("trips").unwrap().is_empty());
}

#[tokio::test]
async fn test_request_budget_paces_a_burst() {
    let budget = RequestBudget::with_min_interval(Duration::from_millis(20));

    let start = tokio::time::Instant::now();
    for _ in 0..4 {
        budget.acquire().await;
    }

    // Three enforced gaps of 20ms after the free first request.
    assert!(start.elapsed() >= Duration::from_millis(60));
}
