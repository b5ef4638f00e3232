//! Run loop orchestration
//!
//! One run drives plan → fetch → transform → write → advance for a single
//! stream, strictly sequentially, until the plan is exhausted, the budget
//! runs out, or a failure stops it at a partition boundary. Every outcome
//! is terminal and the whole loop is safe to re-invoke from scratch; that
//! is the resumability contract.
//!
//! # Components
//!
//! - [`orchestrator`] - The run loop state machine
//! - [`config`] - Per-run budgets
//!
//! # Error Handling
//!
//! Failures never advance a checkpoint past un-committed data. A failed run
//! is fully retried from the last durable checkpoint on the next scheduled
//! invocation, with no duplicates produced.

pub mod config;
pub mod orchestrator;

pub use config::RunBudget;
pub use orchestrator::{Orchestrator, RunReport, RunStatus, StopReason};

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::fetcher::FetchError;
use crate::writer::WriteError;

/// Errors raised while assembling an orchestrator.
///
/// Terminal run outcomes are not errors; they are reported in
/// [`RunReport`]. This type only covers wiring failures.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Checkpoint store could not be opened
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Fetcher could not be constructed
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetchError),

    /// Table store could not be opened
    #[error("writer error: {0}")]
    Writer(#[from] WriteError),

    /// Configuration rejected
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
