//! Durable per-stream checkpoints
//!
//! A checkpoint records the exclusive upper bound of data already committed
//! for one stream. Advancing is guarded: a cursor can only move strictly
//! forward, so a stale run can never overwrite progress made by a newer one.

pub mod store;

pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

use crate::Cursor;
use serde::{Deserialize, Serialize};

/// The last successfully ingested position for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    stream_id: String,
    cursor: Cursor,
    updated_at: i64,
}

impl Checkpoint {
    /// Checkpoint for a stream that has never committed anything: the cursor
    /// sits at the stream's epoch.
    pub fn initial(stream_id: impl Into<String>, epoch: Cursor) -> Self {
        Self {
            stream_id: stream_id.into(),
            cursor: epoch,
            updated_at: 0,
        }
    }

    /// Checkpoint at a given cursor, stamped with the given wall-clock time.
    pub fn at(stream_id: impl Into<String>, cursor: Cursor, updated_at: i64) -> Self {
        Self {
            stream_id: stream_id.into(),
            cursor,
            updated_at,
        }
    }

    /// The stream this checkpoint belongs to.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Exclusive upper bound of committed data.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// When the checkpoint was last advanced (Unix milliseconds, 0 if never).
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

/// Errors from checkpoint storage.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The advance would move the cursor backwards or stand still; another
    /// run has already progressed at least this far.
    #[error(
        "stale checkpoint for {stream_id}: stored cursor {stored} is not before attempted {attempted}"
    )]
    Stale {
        /// Stream whose advance was rejected
        stream_id: String,
        /// Cursor currently stored
        stored: Cursor,
        /// Cursor the caller attempted to store
        attempted: Cursor,
    },

    /// Persisted document was written by an incompatible version
    #[error("checkpoint schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
