//! scalectl - command-line companion for the resource scaler
//!
//! Sends log batches and alarm notifications to a running scaler,
//! shows its health, and aggregates captured batches offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{aggregate, alarm, health, ingest};
use scaler_lib::pipeline::PayloadEncoding;
use std::path::PathBuf;

/// Resource Scaler CLI
#[derive(Parser)]
#[command(name = "scalectl")]
#[command(author, version, about = "CLI for the Resource Scaler", long_about = None)]
pub struct Cli {
    /// Scaler API URL (can also be set via SCALECTL_API_URL env var)
    #[arg(long, env = "SCALECTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a JSON log envelope to the scaler as a log batch
    Ingest {
        /// File holding the uncompressed log envelope
        file: PathBuf,

        /// Payload encoding (gzip+base64, identity)
        #[arg(long, default_value = "gzip+base64", value_parser = parse_encoding)]
        encoding: PayloadEncoding,
    },

    /// Deliver an alarm state change to the scaler
    Alarm {
        /// New alarm state (ALARM, OK, INSUFFICIENT_DATA)
        #[arg(long, default_value = "ALARM")]
        state: String,

        /// Alarm name (the scaler's configured alarm if not specified)
        #[arg(long)]
        alarm_name: Option<String>,

        /// State change reason
        #[arg(long, default_value = "Triggered from scalectl")]
        reason: String,
    },

    /// Decode and average a captured log batch without publishing
    Aggregate {
        /// File holding the batch payload
        file: PathBuf,

        /// Payload encoding (gzip+base64, gzip, identity)
        #[arg(long, default_value = "identity", value_parser = parse_encoding)]
        encoding: PayloadEncoding,

        /// Container name used for the ContainerName dimension
        #[arg(long, short)]
        container_name: Option<String>,
    },

    /// Show scaler health
    Health,
}

fn parse_encoding(value: &str) -> std::result::Result<PayloadEncoding, String> {
    value.parse().map_err(|e: scaler_lib::ScalerError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.format(cli.format);
    let api_client = || client::ApiClient::new(&config.api_url(cli.api_url.clone()));

    match cli.command {
        Commands::Ingest { file, encoding } => {
            ingest::send_batch(&api_client()?, &file, encoding, format).await?;
        }
        Commands::Alarm {
            state,
            alarm_name,
            reason,
        } => {
            alarm::trigger_alarm(&api_client()?, &state, alarm_name, &reason, format).await?;
        }
        Commands::Aggregate {
            file,
            encoding,
            container_name,
        } => {
            let container_name = container_name
                .or_else(|| config.container_name.clone())
                .unwrap_or_else(|| "default".to_string());
            aggregate::aggregate_file(&file, encoding, &container_name, format)?;
        }
        Commands::Health => {
            health::show_health(&api_client()?, format).await?;
        }
    }

    Ok(())
}
