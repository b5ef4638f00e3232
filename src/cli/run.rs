//! Run command implementation
//!
//! The single invocation surface the external scheduler calls: one stream,
//! one budget, one terminal status. Safe to invoke repeatedly on a fixed
//! schedule.

use crate::config::IngestConfig;
use crate::runner::{Orchestrator, RunBudget, RunReport};
use crate::shutdown::SharedShutdown;
use crate::Cursor;
use chrono::{DateTime, NaiveDate};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{CheckpointCommand, CliError, StreamsCommand};

/// Incremental, resumable ingestion of time-partitioned data
#[derive(Debug, Parser)]
#[command(name = "incremental-ingestor", version, about)]
pub struct Cli {
    /// Path to the ingest config file
    #[arg(short, long, default_value = "ingest.json", global = true)]
    pub config: PathBuf,

    /// Bind a Prometheus metrics endpoint (e.g. 0.0.0.0:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<std::net::SocketAddr>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest one stream up to its per-run budget
    Run(RunArgs),
    /// List the configured streams
    Streams(StreamsCommand),
    /// Inspect or reset a stream's checkpoint
    Checkpoint(CheckpointCommand),
}

/// Try to parse a datetime from RFC3339, with or without a timezone
/// designator (no designator means UTC). Returns Unix milliseconds.
fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp_millis());
    }

    None
}

/// Parse an `--as-of` instant from YYYY-MM-DD or RFC3339.
///
/// A date-only value means start-of-day UTC, so planning stops at the
/// previous day boundary exactly as it would have at that midnight.
pub fn parse_as_of(input: &str) -> Result<Cursor, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(Cursor::from_millis(ts));
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid --as-of value: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument("Invalid --as-of value".to_string()))?;
    Ok(Cursor::from_millis(datetime.and_utc().timestamp_millis()))
}

/// Arguments for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stream id to ingest
    #[arg(long)]
    pub stream: String,

    /// Maximum partitions committed in this run
    #[arg(long, default_value_t = crate::runner::config::DEFAULT_MAX_PARTITIONS)]
    pub max_partitions: u32,

    /// Maximum wall-clock seconds for this run
    #[arg(long, default_value_t = 600)]
    pub max_runtime_secs: u64,

    /// Plan against this instant instead of the wall clock
    /// (YYYY-MM-DD or RFC3339)
    #[arg(long)]
    pub as_of: Option<String>,

    /// Override the destination table root from the config file
    #[arg(long)]
    pub table_root: Option<PathBuf>,

    /// Suppress the progress bar
    #[arg(long)]
    pub quiet: bool,
}

impl RunArgs {
    /// Execute one run and return its terminal report.
    pub async fn execute(
        &self,
        cli: &Cli,
        shutdown: SharedShutdown,
    ) -> Result<RunReport, CliError> {
        let mut config = IngestConfig::load(&cli.config)?;
        if let Some(table_root) = &self.table_root {
            config.table_root = table_root.clone();
        }

        let stream = config
            .stream(&self.stream)
            .cloned()
            .ok_or_else(|| CliError::UnknownStream(self.stream.clone()))?;

        let mut orchestrator =
            Orchestrator::from_config(&config, &stream)?.with_shutdown(shutdown);

        if let Some(as_of) = &self.as_of {
            orchestrator = orchestrator.with_as_of(parse_as_of(as_of)?);
        }

        if !self.quiet {
            let bar = ProgressBar::new(u64::from(self.max_partitions));
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} partitions {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let hook_bar = bar.clone();
            orchestrator = orchestrator.with_on_commit(Box::new(move |partition, rows| {
                hook_bar.set_message(format!("{} ({rows} rows)", partition.key()));
                hook_bar.inc(1);
            }));

            let budget = RunBudget::new(
                self.max_partitions,
                Duration::from_secs(self.max_runtime_secs),
            );
            let report = orchestrator.run(budget).await;
            bar.finish_and_clear();
            return Ok(report);
        }

        let budget = RunBudget::new(
            self.max_partitions,
            Duration::from_secs(self.max_runtime_secs),
        );
        info!(
            stream = %self.stream,
            max_partitions = budget.max_partitions,
            "Starting run"
        );
        Ok(orchestrator.run(budget).await)
    }
}
