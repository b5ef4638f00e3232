//! Table store commit semantics through the public API

use incremental_ingestor::writer::{CsvTableStore, PartitionWriter, WriteError};
use incremental_ingestor::{Cursor, Partition, Record};
use tempfile::TempDir;

const DAY: i64 = 86_400_000;

fn partition(stream: &str, n: i64) -> Partition {
    Partition::new(
        stream,
        Cursor::from_millis(n * DAY),
        Cursor::from_millis((n + 1) * DAY),
    )
}

fn records(n: i64, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record {
            timestamp: n * DAY + (i as i64) * 1_000 + 1,
            key: format!("row-{i}"),
            payload: serde_json::json!({"day": n, "i": i}),
        })
        .collect()
}

#[test]
fn test_commit_twice_is_one_logical_state() {
    let dir = TempDir::new().unwrap();
    let store = CsvTableStore::new(dir.path()).unwrap();
    let p = partition("trips", 5);
    let rows = records(5, 10);

    let first = store.commit(&p, &rows).unwrap();
    assert_eq!(first.rows_written, 10);
    assert!(!first.replaced);

    let second = store.commit(&p, &rows).unwrap();
    assert_eq!(second.rows_written, 10);
    assert!(second.replaced);

    assert_eq!(store.list_partitions("trips").unwrap().len(), 1);
    assert_eq!(store.read_partition(&p).unwrap().len(), 10);
}

#[test]
fn test_streams_do_not_interfere() {
    let dir = TempDir::new().unwrap();
    let store = CsvTableStore::new(dir.path()).unwrap();

    store.commit(&partition("trips", 1), &records(1, 3)).unwrap();
    store
        .commit(&partition("weather", 1), &records(1, 7))
        .unwrap();

    assert_eq!(store.list_partitions("trips").unwrap().len(), 1);
    assert_eq!(store.list_partitions("weather").unwrap().len(), 1);
    assert_eq!(
        store.read_partition(&partition("weather", 1)).unwrap().len(),
        7
    );
    assert!(store.list_partitions("unknown").unwrap().is_empty());
}

#[test]
fn test_payloads_round_trip_through_csv() {
    let dir = TempDir::new().unwrap();
    let store = CsvTableStore::new(dir.path()).unwrap();
    let p = partition("trips", 2);

    let awkward = vec![Record {
        timestamp: 2 * DAY + 1,
        key: "has,comma \"and\" quotes".to_string(),
        payload: serde_json::json!({
            "text": "line\nbreak, \"quoted\"",
            "nested": {"a": [1, 2, 3]},
            "null": null
        }),
    }];

    store.commit(&p, &awkward).unwrap();
    let back = store.read_partition(&p).unwrap();
    assert_eq!(back, awkward);
}

#[test]
fn test_foreign_schema_is_a_conflict_not_an_overwrite() {
    let dir = TempDir::new().unwrap();
    let store = CsvTableStore::new(dir.path()).unwrap();
    let p = partition("trips", 3);

    let foreign = dir.path().join("trips").join(format!("{}.csv", p.key()));
    std::fs::create_dir_all(foreign.parent().unwrap()).unwrap();
    std::fs::write(&foreign, "vendor_id,fare\n1,12.5\n").unwrap();

    let err = store.commit(&p, &records(3, 1)).unwrap_err();
    assert!(matches!(err, WriteError::Conflict(_)));

    // The conflicting file was left untouched.
    let contents = std::fs::read_to_string(&foreign).unwrap();
    assert!(contents.starts_with("vendor_id,fare"));
}
