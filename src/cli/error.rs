//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::runner::RunError;
use crate::writer::WriteError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Orchestrator wiring error
    #[error("run error: {0}")]
    Run(#[from] RunError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Table store error
    #[error("table error: {0}")]
    Write(#[from] WriteError),

    /// Stream not present in the config file
    #[error("unknown stream '{0}' - see `streams` for the configured ids")]
    UnknownStream(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
