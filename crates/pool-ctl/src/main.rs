//! pool-ctl: command-line probe for the Pool daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Parser)]
#[command(name = "pool-ctl", about = "Talk to a running poold")]
struct Cli {
    /// Daemon host
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Daemon port
    #[arg(long, global = true, default_value_t = pool_core::config::DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handshake, report a location, print whoever is nearby
    Probe {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
    /// Handshake only; print the issued identity
    Offer,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);

    match cli.command {
        Command::Probe {
            latitude,
            longitude,
        } => cmd::probe::cmd_probe(&addr, latitude, longitude).await,
        Command::Offer => cmd::probe::cmd_offer(&addr).await,
    }
}
