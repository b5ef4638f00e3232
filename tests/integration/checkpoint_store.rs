//! Checkpoint store semantics under contention and across restarts

use incremental_ingestor::checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore};
use incremental_ingestor::Cursor;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn cursor(ms: i64) -> Cursor {
    Cursor::from_millis(ms)
}

#[test]
fn test_checkpoint_survives_store_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        store.advance("trips", cursor(7_000)).unwrap();
    }

    // A later run opens its own store over the same directory.
    let store = FileCheckpointStore::new(dir.path()).unwrap();
    let checkpoint = store.load("trips", cursor(0)).unwrap();
    assert_eq!(checkpoint.cursor(), cursor(7_000));
}

#[test]
fn test_concurrent_advances_to_same_cursor_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    store.advance("trips", cursor(5_000)).unwrap();

    // Ten racers all try to push the same next cursor.
    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.advance("trips", cursor(6_000)).is_ok()
        }));
    }

    let successes: usize = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(|&won| won)
        .count();

    assert_eq!(successes, 1, "exactly one racer may advance the cursor");
    assert_eq!(store.load("trips", cursor(0)).unwrap().cursor(), cursor(6_000));
}

#[test]
fn test_concurrent_distinct_advances_end_at_maximum() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());

    let mut handles = Vec::new();
    for n in 1..=8i64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            // Failures are expected: any racer landing after a larger
            // cursor is stale by design.
            let _ = store.advance("trips", cursor(n * 1_000));
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    // Whatever the interleaving, the stored cursor is one of the attempted
    // values and every subsequent load sees a non-decreasing cursor.
    let final_cursor = store.load("trips", cursor(0)).unwrap().cursor();
    assert!(final_cursor >= cursor(1_000));
    assert!(final_cursor <= cursor(8_000));
    assert_eq!(final_cursor.millis() % 1_000, 0);

    // And the maximum attempted value can never be exceeded nor regressed.
    assert!(matches!(
        store.advance("trips", final_cursor),
        Err(CheckpointError::Stale { .. })
    ));
}

#[test]
fn test_stale_error_carries_both_cursors() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path()).unwrap();

    store.advance("trips", cursor(9_000)).unwrap();
    match store.advance("trips", cursor(3_000)) {
        Err(CheckpointError::Stale {
            stream_id,
            stored,
            attempted,
        }) => {
            assert_eq!(stream_id, "trips");
            assert_eq!(stored, cursor(9_000));
            assert_eq!(attempted, cursor(3_000));
        }
        other => panic!("Expected Stale, got {other:?}"),
    }
}

#[test]
fn test_no_partial_document_left_behind() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path()).unwrap();

    for n in 1..=20i64 {
        store.advance("trips", cursor(n)).unwrap();
    }

    // Temp files from the atomic-rename writes must all be gone.
    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.ends_with(".json") && !name.ends_with(".lock"))
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
}
