// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Send raw command bytes to the platform TPM.
//!
//! Usage:
//!   tpm-exchange probe
//!   tpm-exchange send 80010000000c0000017b0008

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tpm_transport::{TpmSession, TransportConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON transport config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// TPM device node (Unix only)
    #[arg(long, global = true, env = "TPM_TRANSPORT_DEVICE")]
    device: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open and close a TPM session
    Probe,
    /// Submit a hex-encoded command and print the hex response
    Send(SendArgs),
}

#[derive(Parser)]
struct SendArgs {
    /// Command bytes in hex
    #[clap(value_parser)]
    command: String,
}

fn load_config(cli: &Cli) -> Result<TransportConfig> {
    let mut config = match &cli.config {
        Some(path) => TransportConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TransportConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device = device.clone();
    }
    Ok(config)
}

fn cmd_probe(config: &TransportConfig) -> Result<()> {
    let mut session = TpmSession::open_with(config).context("failed to open TPM session")?;
    println!("TPM channel opened: {}", config.device.display());
    session.close();
    Ok(())
}

fn cmd_send(config: &TransportConfig, args: &SendArgs) -> Result<()> {
    let command = hex::decode(args.command.trim()).context("command is not valid hex")?;
    let mut session = TpmSession::open_with(config).context("failed to open TPM session")?;
    let response = session
        .exchange(&command)
        .context("TPM exchange failed")?;
    info!("received {} byte response", response.len());
    println!("{}", hex::encode(&response));
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Probe => cmd_probe(&config)?,
        Commands::Send(args) => cmd_send(&config, args)?,
    }

    Ok(())
}
