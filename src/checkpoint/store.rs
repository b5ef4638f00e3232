//! Checkpoint persistence with atomic compare-and-advance
//!
//! The file-backed store keeps one JSON document per stream, written with a
//! temp-file rename under an exclusive advisory lock. The lock serializes
//! the read-compare-write cycle, which is what makes `advance` safe when an
//! external scheduler launches two overlapping runs for the same stream.

use super::{Checkpoint, CheckpointError};
use crate::Cursor;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Current checkpoint document schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Loads and advances per-stream checkpoints.
///
/// `advance` must be atomic from the caller's perspective and reject any
/// cursor that is not strictly greater than the stored one.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a stream, or its initial default at `epoch`
    /// if nothing has been committed yet.
    fn load(&self, stream_id: &str, epoch: Cursor) -> Result<Checkpoint, CheckpointError>;

    /// Advance the stream's cursor to `new_cursor`.
    ///
    /// Fails with [`CheckpointError::Stale`] when `new_cursor` is not
    /// strictly greater than the stored cursor.
    fn advance(&self, stream_id: &str, new_cursor: Cursor) -> Result<Checkpoint, CheckpointError>;
}

/// On-disk checkpoint document
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    schema_version: String,
    stream_id: String,
    cursor: Cursor,
    updated_at: i64,
    total_advances: u64,
}

/// File-backed checkpoint store: one JSON document per stream under a
/// directory, guarded by per-stream lock files.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn document_path(&self, stream_id: &str) -> PathBuf {
        self.dir.join(format!("{stream_id}.json"))
    }

    fn lock_file(&self, stream_id: &str) -> Result<File, CheckpointError> {
        let lock_path = self.dir.join(format!("{stream_id}.lock"));
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CheckpointError::Lock(format!("Failed to open lock file: {e}")))
    }

    fn read_document(&self, path: &Path) -> Result<Option<CheckpointDocument>, CheckpointError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        let document: CheckpointDocument = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, path = %path.display(), "Failed to deserialize checkpoint");
            CheckpointError::Serialization(e.to_string())
        })?;

        if document.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: document.schema_version,
            });
        }

        Ok(Some(document))
    }

    /// Atomically replace the document file: write to a temp file in the
    /// same directory, fsync, rename over the target, fsync the directory.
    fn write_document(
        &self,
        path: &Path,
        document: &CheckpointDocument,
    ) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| CheckpointError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::Io(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| CheckpointError::Io(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    /// Delete a stream's checkpoint so the next run restarts from the epoch.
    ///
    /// Safe because commits are idempotent: re-ingesting already-committed
    /// partitions replaces them with identical content.
    pub fn reset(&self, stream_id: &str) -> Result<bool, CheckpointError> {
        let path = self.document_path(stream_id);

        let mut lock = RwLock::new(self.lock_file(stream_id)?);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("Failed to acquire write lock: {e}")))?;

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        info!(stream_id = stream_id, "Checkpoint reset");
        Ok(true)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, stream_id: &str, epoch: Cursor) -> Result<Checkpoint, CheckpointError> {
        let path = self.document_path(stream_id);

        let lock = RwLock::new(self.lock_file(stream_id)?);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::Lock(format!("Failed to acquire read lock: {e}")))?;

        match self.read_document(&path)? {
            Some(document) => {
                debug!(
                    stream_id = stream_id,
                    cursor = %document.cursor,
                    "Checkpoint loaded"
                );
                Ok(Checkpoint::at(
                    document.stream_id,
                    document.cursor,
                    document.updated_at,
                ))
            }
            None => {
                debug!(
                    stream_id = stream_id,
                    epoch = %epoch,
                    "No checkpoint found, starting from stream epoch"
                );
                Ok(Checkpoint::initial(stream_id, epoch))
            }
        }
    }

    fn advance(&self, stream_id: &str, new_cursor: Cursor) -> Result<Checkpoint, CheckpointError> {
        let path = self.document_path(stream_id);

        // Exclusive lock held across read-compare-write: two racing runs
        // observe each other's committed cursor, never a torn state.
        let mut lock = RwLock::new(self.lock_file(stream_id)?);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let existing = self.read_document(&path)?;
        let total_advances = match &existing {
            Some(document) => {
                if new_cursor <= document.cursor {
                    return Err(CheckpointError::Stale {
                        stream_id: stream_id.to_string(),
                        stored: document.cursor,
                        attempted: new_cursor,
                    });
                }
                document.total_advances + 1
            }
            None => 1,
        };

        let updated_at = chrono::Utc::now().timestamp_millis();
        let document = CheckpointDocument {
            schema_version: SCHEMA_VERSION.to_string(),
            stream_id: stream_id.to_string(),
            cursor: new_cursor,
            updated_at,
            total_advances,
        };
        self.write_document(&path, &document)?;

        info!(
            stream_id = stream_id,
            cursor = %new_cursor,
            total_advances = total_advances,
            "Checkpoint advanced"
        );

        Ok(Checkpoint::at(stream_id, new_cursor, updated_at))
    }
}

/// In-memory checkpoint store with the same strictly-increasing guard.
///
/// Useful for tests and embedded callers that manage durability elsewhere.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    cursors: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, stream_id: &str, epoch: Cursor) -> Result<Checkpoint, CheckpointError> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|e| CheckpointError::Lock(e.to_string()))?;
        Ok(cursors
            .get(stream_id)
            .cloned()
            .unwrap_or_else(|| Checkpoint::initial(stream_id, epoch)))
    }

    fn advance(&self, stream_id: &str, new_cursor: Cursor) -> Result<Checkpoint, CheckpointError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|e| CheckpointError::Lock(e.to_string()))?;

        if let Some(stored) = cursors.get(stream_id) {
            if new_cursor <= stored.cursor() {
                return Err(CheckpointError::Stale {
                    stream_id: stream_id.to_string(),
                    stored: stored.cursor(),
                    attempted: new_cursor,
                });
            }
        }

        let checkpoint = Checkpoint::at(
            stream_id,
            new_cursor,
            chrono::Utc::now().timestamp_millis(),
        );
        cursors.insert(stream_id.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }
}
