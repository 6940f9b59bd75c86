#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the OpenCellID ingester.

use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use opencellid_cli_utils::{IndicatifProgress, MultiProgress};
use opencellid_ingest::IngestError;
use opencellid_ingest::config::ConfigArgs;
use opencellid_ingest::pipeline::{self, Observers};
use opencellid_models::progress::null_progress;

#[derive(Parser)]
#[command(
    name = "opencellid_ingest",
    about = "Download the OpenCellID cell tower dump and load it into a spatially indexed collection"
)]
struct Cli {
    #[command(flatten)]
    args: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Download the dump if needed, then load it (default)
    Sync,
    /// Only download the dump
    Download,
    /// Only load an already downloaded dump
    Load,
}

#[tokio::main]
async fn main() -> ExitCode {
    let multi = opencellid_cli_utils::init_logger();
    let cli = Cli::parse();

    match run(&cli, &multi).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{} failed: {e}", e.stage());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, multi: &MultiProgress) -> Result<(), IngestError> {
    let config = cli.args.resolve()?;
    let start = Instant::now();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let download = if config.needs_download() {
                IndicatifProgress::download_bar(multi, "Downloading")
            } else {
                null_progress()
            };
            let observers = Observers {
                download,
                load: IndicatifProgress::records_bar(multi, "Loading"),
            };

            let report = pipeline::sync(&config, &observers).await?;
            if let Some(bytes) = report.downloaded {
                log::info!("Downloaded {bytes} bytes");
            }
            log::info!(
                "Sync complete: {} documents in {}, {} new indexes, took {:.1}s",
                report.load.documents,
                config.collection,
                report.load.indexes_created.len(),
                start.elapsed().as_secs_f64(),
            );
        }
        Commands::Download => {
            let progress = IndicatifProgress::download_bar(multi, "Downloading");
            let bytes = pipeline::download(&config, &progress).await?;
            log::info!(
                "Downloaded {bytes} bytes to {} in {:.1}s",
                config.artifact.display(),
                start.elapsed().as_secs_f64(),
            );
        }
        Commands::Load => {
            let progress = IndicatifProgress::records_bar(multi, "Loading");
            let summary = pipeline::load(&config, &progress).await?;
            log::info!(
                "Load complete: {} documents in {}, took {:.1}s",
                summary.documents,
                config.collection,
                start.elapsed().as_secs_f64(),
            );
        }
    }

    Ok(())
}
