//! Idempotent table writers
//!
//! A writer commits one partition's records into the destination table with
//! replace-by-partition semantics: committing the same partition twice
//! leaves the table in the same logical state as committing it once. That
//! property is what makes interrupted and concurrently repeated runs safe.

use crate::{Partition, Record};

pub mod table;

pub use table::CsvTableStore;

/// Writer errors
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Unresolvable conflict with existing table state (schema clash).
    /// Ordinary repeated commits are absorbed silently and never reach this.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(String),

    /// Payload serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The durable outcome of one partition commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Rows in the committed partition
    pub rows_written: u64,
    /// Whether an earlier commit of the same partition was replaced
    pub replaced: bool,
}

/// Commits partitions into the destination table.
///
/// The writer is the sole mutator of destination tables. The table must be
/// durable before `commit` returns.
pub trait PartitionWriter: Send + Sync {
    /// Durably commit `records` as the content of `partition`, replacing
    /// any prior commit of the same partition.
    fn commit(&self, partition: &Partition, records: &[Record])
        -> Result<CommitOutcome, WriteError>;
}
