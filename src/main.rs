//! Main entry point for the incremental-ingestor CLI

use anyhow::Context;
use clap::Parser;
use incremental_ingestor::cli::{Cli, Commands};
use incremental_ingestor::runner::RunStatus;
use incremental_ingestor::shutdown::{self, SharedShutdown, ShutdownCoordinator};
use incremental_ingestor::{metrics, RunReport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("incremental_ingestor=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_report(report: &RunReport) {
    info!(
        stream = %report.stream_id,
        status = %report.status,
        stop = %report.stop,
        partitions = report.partitions_committed,
        records = report.records_written,
        cursor = %report.final_cursor,
        "Run finished"
    );

    println!(
        "{}: {} ({}) - {} partitions, {} records, cursor {}",
        report.stream_id,
        report.status,
        report.stop,
        report.partitions_committed,
        report.records_written,
        report.final_cursor
    );
    if let Some(detail) = &report.detail {
        println!("detail: {detail}");
    }
}

/// Dispatch the parsed command, returning the process exit code.
async fn execute(cli: &Cli, shutdown: SharedShutdown) -> anyhow::Result<i32> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to initialize metrics")?;
    }

    match &cli.command {
        Commands::Run(args) => {
            let report = args.execute(cli, shutdown).await?;
            print_report(&report);
            Ok(match report.status {
                RunStatus::Done => 0,
                RunStatus::Failed => 1,
                RunStatus::Cancelled => 130,
            })
        }
        Commands::Streams(cmd) => {
            cmd.execute(cli).await?;
            Ok(0)
        }
        Commands::Checkpoint(cmd) => {
            cmd.execute(cli).await?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing current partition...");
                shutdown.request_shutdown();
            }
        }
    });

    match execute(&cli, shutdown).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
