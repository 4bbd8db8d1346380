mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkdrop_channels::EnvCredentials;
use chunkdrop_upload::{FileCommandSniffer, LogNotifier, UploadOrchestrator};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "chunkdrop", version, about = "Upload files in parts to S3, SFTP or HTTP")]
struct Cli {
    /// Config file (default: ~/.config/chunkdrop/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload files to the configured transport.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote directory, overriding `destination_prefix`.
        #[arg(long)]
        prefix: Option<String>,

        /// Print the batch report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Open and close a session to check the transport settings.
    TestConnection,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chunkdrop starting");

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let cfg = CliConfig::load(&config_path)?;

    let channel = cfg
        .transport(&config_path)?
        .build(&EnvCredentials::new())
        .context("failed to set up transport")?;

    let mut orchestrator =
        UploadOrchestrator::new(channel, Arc::new(LogNotifier), cfg.upload_options())
            .with_sniffer(Box::new(FileCommandSniffer::new()));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::TestConnection => {
            let prefix = cfg.destination_prefix.clone();
            Ok(match orchestrator.test_connection(&prefix).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            })
        }
        Command::Upload {
            files,
            prefix,
            json,
        } => {
            let prefix = prefix.unwrap_or_else(|| cfg.destination_prefix.clone());
            let report = match orchestrator.run_paths(&files, prefix).await {
                Ok(report) => report,
                // Already reported through the notifier.
                Err(_) => return Ok(ExitCode::FAILURE),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if let Some(text) = report.clipboard_text() {
                println!("{text}");
            }

            Ok(if report.fully_succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
