//! Partitioned CSV table store
//!
//! Layout: `<root>/<stream_id>/<partition_key>.csv`, one durable file per
//! committed partition. A commit builds the whole partition file in a temp
//! file and renames it over the target, so re-committing a partition is a
//! byte-for-byte replace and a torn write can never be observed.

use super::{CommitOutcome, PartitionWriter, WriteError};
use crate::{Partition, Record};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column layout of every partition file.
const HEADER: [&str; 3] = ["timestamp", "key", "payload"];

/// File-system backed table store writing one CSV file per partition.
pub struct CsvTableStore {
    root: PathBuf,
}

impl CsvTableStore {
    /// Open a table store rooted at `root`, creating the directory if needed.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, WriteError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| WriteError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    /// Root directory of the table store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.root.join(stream_id)
    }

    fn partition_path(&self, partition: &Partition) -> PathBuf {
        self.stream_dir(&partition.stream_id)
            .join(format!("{}.csv", partition.key()))
    }

    /// Reject a commit whose column layout clashes with an already
    /// committed partition file. Anything else about an existing file is
    /// simply replaced.
    fn check_schema(&self, path: &Path) -> Result<(), WriteError> {
        if !path.exists() {
            return Ok(());
        }

        let mut reader = csv::Reader::from_path(path).map_err(|e| WriteError::Csv(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| WriteError::Csv(e.to_string()))?;

        if headers.iter().ne(HEADER.iter().copied()) {
            return Err(WriteError::Conflict(format!(
                "existing partition file {} has incompatible columns [{}]",
                path.display(),
                headers.iter().collect::<Vec<_>>().join(",")
            )));
        }

        Ok(())
    }

    /// Read back one committed partition, in stored order.
    pub fn read_partition(&self, partition: &Partition) -> Result<Vec<Record>, WriteError> {
        let path = self.partition_path(partition);
        let mut reader = csv::Reader::from_path(&path).map_err(|e| WriteError::Csv(e.to_string()))?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| WriteError::Csv(e.to_string()))?;
            let timestamp: i64 = row
                .get(0)
                .unwrap_or_default()
                .parse()
                .map_err(|e| WriteError::Csv(format!("bad timestamp column: {e}")))?;
            let key = row.get(1).unwrap_or_default().to_string();
            let payload = serde_json::from_str(row.get(2).unwrap_or("null"))
                .map_err(|e| WriteError::Serialization(e.to_string()))?;
            records.push(Record {
                timestamp,
                key,
                payload,
            });
        }

        Ok(records)
    }

    /// Keys of all committed partitions for a stream, ascending.
    ///
    /// Keys sort lexicographically in time order, so this is the committed
    /// prefix from the stream's epoch.
    pub fn list_partitions(&self, stream_id: &str) -> Result<Vec<String>, WriteError> {
        let dir = self.stream_dir(stream_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| WriteError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| WriteError::Io(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = name.strip_suffix(".csv") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl PartitionWriter for CsvTableStore {
    fn commit(
        &self,
        partition: &Partition,
        records: &[Record],
    ) -> Result<CommitOutcome, WriteError> {
        partition.validate().map_err(WriteError::Conflict)?;

        let stream_dir = self.stream_dir(&partition.stream_id);
        std::fs::create_dir_all(&stream_dir).map_err(|e| WriteError::Io(e.to_string()))?;

        let path = self.partition_path(partition);
        self.check_schema(&path)?;
        let replaced = path.exists();

        // Merge by key (last occurrence wins) and store in (timestamp, key)
        // order: equivalent input batches produce identical files.
        let mut by_key: BTreeMap<(i64, String), &Record> = BTreeMap::new();
        let mut seen: std::collections::HashMap<&str, (i64, String)> = std::collections::HashMap::new();
        for record in records {
            if let Some(previous) = seen.remove(record.key.as_str()) {
                by_key.remove(&previous);
            }
            let slot = (record.timestamp, record.key.clone());
            seen.insert(record.key.as_str(), slot.clone());
            by_key.insert(slot, record);
        }

        let mut temp_file = tempfile::NamedTempFile::new_in(&stream_dir)
            .map_err(|e| WriteError::Io(format!("Failed to create temp file: {e}")))?;

        {
            let mut csv_writer = csv::Writer::from_writer(&mut temp_file);
            csv_writer
                .write_record(HEADER)
                .map_err(|e| WriteError::Csv(e.to_string()))?;
            for record in by_key.values() {
                let payload = serde_json::to_string(&record.payload)
                    .map_err(|e| WriteError::Serialization(e.to_string()))?;
                csv_writer
                    .write_record([
                        record.timestamp.to_string().as_str(),
                        record.key.as_str(),
                        payload.as_str(),
                    ])
                    .map_err(|e| WriteError::Csv(e.to_string()))?;
            }
            csv_writer
                .flush()
                .map_err(|e| WriteError::Io(e.to_string()))?;
        }

        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| WriteError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| WriteError::Io(format!("Failed to persist partition file: {e}")))?;

        if let Ok(dir) = File::open(&stream_dir) {
            let _ = dir.sync_all();
        }

        let rows_written = by_key.len() as u64;
        if replaced {
            debug!(
                partition = %partition,
                rows = rows_written,
                "Replaced existing partition commit"
            );
        } else {
            info!(
                partition = %partition,
                rows = rows_written,
                path = %path.display(),
                "Partition committed"
            );
        }

        Ok(CommitOutcome {
            rows_written,
            replaced,
        })
    }
}
