//! Streams command implementation

use crate::config::IngestConfig;
use clap::Args;

use super::{Cli, CliError};

/// List the configured streams and their ingest parameters.
#[derive(Debug, Args)]
pub struct StreamsCommand {
    /// Show full source URLs instead of truncating
    #[arg(long)]
    pub full: bool,
}

impl StreamsCommand {
    /// Print the stream catalog.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = IngestConfig::load(&cli.config)?;

        println!(
            "{:<20} {:<6} {:<22} {:<8} SOURCE",
            "STREAM", "GRAIN", "EPOCH", "RPM"
        );
        for stream in &config.streams {
            let source = if self.full || stream.source_url.len() <= 48 {
                stream.source_url.clone()
            } else {
                format!("{}…", &stream.source_url[..47])
            };
            println!(
                "{:<20} {:<6} {:<22} {:<8} {}",
                stream.id,
                stream.granularity.to_string(),
                stream.epoch.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                stream.rate.max_requests_per_minute,
                source
            );
        }

        Ok(())
    }
}
