//! Record transformation between fetch and write
//!
//! Per-stream domain logic (parsing, filtering, enrichment) plugs in here as
//! a fixed `records -> records` capability, keeping the run loop decoupled
//! from what the records mean.

use crate::Record;

/// Transform errors
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// A record could not be transformed and the batch must not be committed
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// A pluggable step applied to every fetched batch before it is committed.
///
/// Implementations must be deterministic for the commit idempotence
/// guarantee to carry through: transforming the same input batch twice must
/// yield equivalent output.
pub trait RecordTransform: Send + Sync {
    /// Transform one partition's records.
    fn apply(&self, records: Vec<Record>) -> Result<Vec<Record>, TransformError>;

    /// Name of the transform, for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Pass-through transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl RecordTransform for IdentityTransform {
    fn apply(&self, records: Vec<Record>) -> Result<Vec<Record>, TransformError> {
        Ok(records)
    }

    fn name(&self) -> &str {
        "identity"
    }
}
