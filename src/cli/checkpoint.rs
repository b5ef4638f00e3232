//! Checkpoint command implementation
//!
//! Operational visibility into per-stream progress: what the original
//! pipeline exposed through its download log, surfaced here from the
//! checkpoint store and the committed table prefix.

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::IngestConfig;
use crate::writer::CsvTableStore;
use clap::{Args, Subcommand};

use super::{Cli, CliError};

/// Inspect or reset a stream's checkpoint.
#[derive(Debug, Args)]
pub struct CheckpointCommand {
    /// Checkpoint action
    #[command(subcommand)]
    pub action: CheckpointAction,
}

/// Checkpoint subcommands
#[derive(Debug, Subcommand)]
pub enum CheckpointAction {
    /// Show a stream's cursor and committed partitions
    Show {
        /// Stream id
        #[arg(long)]
        stream: String,
    },
    /// Delete a stream's checkpoint so the next run re-ingests from the
    /// epoch (safe: commits are idempotent)
    Reset {
        /// Stream id
        #[arg(long)]
        stream: String,
    },
}

impl CheckpointCommand {
    /// Execute the checkpoint action.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = IngestConfig::load(&cli.config)?;
        let store = FileCheckpointStore::new(&config.checkpoint_dir)?;

        match &self.action {
            CheckpointAction::Show { stream } => {
                let stream_config = config
                    .stream(stream)
                    .ok_or_else(|| CliError::UnknownStream(stream.clone()))?;

                let checkpoint = store.load(stream, stream_config.epoch_cursor())?;
                let table = CsvTableStore::new(&config.table_root)?;
                let partitions = table.list_partitions(stream)?;

                println!("stream:               {stream}");
                println!("cursor:               {}", checkpoint.cursor());
                if checkpoint.updated_at() > 0 {
                    println!(
                        "updated:              {}",
                        crate::Cursor::from_millis(checkpoint.updated_at())
                    );
                } else {
                    println!("updated:              never (cursor at epoch)");
                }
                println!("committed partitions: {}", partitions.len());
                if let Some(last) = partitions.last() {
                    println!("latest partition:     {last}");
                }
            }
            CheckpointAction::Reset { stream } => {
                config
                    .stream(stream)
                    .ok_or_else(|| CliError::UnknownStream(stream.clone()))?;

                if store.reset(stream)? {
                    println!("Checkpoint for '{stream}' reset; next run re-ingests from the epoch");
                } else {
                    println!("No checkpoint stored for '{stream}'");
                }
            }
        }

        Ok(())
    }
}
