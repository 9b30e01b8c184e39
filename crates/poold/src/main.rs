//! poold: Pool proximity relay daemon.

use std::fs::{File, OpenOptions};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pool_core::config::{LoggingConfig, PoolConfig};
use poold::StopSignal;

const DEFAULT_DB_FILENAME: &str = "locations.sqlite";

#[derive(Parser)]
#[command(name = "poold", about = "Proximity relay daemon")]
struct Args {
    /// Directory holding the SQLite database
    #[arg(short = 'a', long)]
    path: Option<PathBuf>,

    /// Database file name, including extension
    #[arg(short, long)]
    filename: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file (takes precedence over $POOL_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (overrides logging.file)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, problems) = load_config(args.config.as_deref())?;
    if let Some(file) = &args.log_file {
        config.logging.file = file.clone();
    }
    if let Err(e) = init_logging(&config.logging) {
        tracing::warn!(path = %config.logging.file.display(), error = %e, "log file unavailable, console only");
    }
    for problem in &problems {
        tracing::warn!("{problem}");
    }

    let cwd = std::env::current_dir().context("cannot resolve working directory")?;
    tracing::info!(cwd = %cwd.display(), "poold starting");

    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(bind) = args.bind {
        config.network.bind_addr = bind;
    }
    config.storage.path = storage_path(
        &cwd,
        args.path.as_deref(),
        args.filename.as_deref(),
        &config.storage.path,
    );

    if let Some(parent) = config.storage.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create storage directory {}", parent.display()))?;
    }
    tracing::info!(
        path = %config.storage.path.display(),
        port = config.network.port,
        read_timeout_secs = config.session.read_timeout_secs,
        handshake_attempts = config.session.attempts(),
        "configuration"
    );

    let server = poold::start(&config).await.context("could not start server")?;
    tracing::info!(addr = %server.local_addr(), "poold says hi");

    // ── Shutdown triggers ────────────────────────────────────────────────────

    {
        let stop = server.stop_signal();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            stop.stop();
        });
    }
    tokio::spawn(console_loop(server.stop_signal()));

    server.wait().await.context("server stopped with an error")?;
    tracing::info!("poold stopped");
    Ok(())
}

/// Config from `--config`, or the default location (written out if missing).
/// Non-fatal problems come back as messages to log once logging is up.
fn load_config(explicit: Option<&Path>) -> Result<(PoolConfig, Vec<String>)> {
    let mut problems = Vec::new();
    let config = match explicit {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            if let Err(e) = PoolConfig::write_default_if_missing() {
                problems.push(format!("failed to write default config: {e}"));
            }
            PoolConfig::load().unwrap_or_else(|e| {
                problems.push(format!("failed to load config, using defaults: {e}"));
                PoolConfig::default()
            })
        }
    };
    Ok((config, problems))
}

/// Console logging filtered by RUST_LOG (else `console_level`), plus a log
/// file at `file_level`. The subscriber is installed even if the file can't
/// be opened; that error is returned for the caller to report.
fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    let console = fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.console_level)),
    );

    let file = open_log_file(&logging.file);
    let file_layer = file.as_ref().ok().map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::clone(file))
            .with_filter(EnvFilter::new(&logging.file_level))
    });

    tracing_subscriber::registry().with(console).with(file_layer).init();
    file.map(|_| ())
}

fn open_log_file(path: &Path) -> std::io::Result<Arc<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Stop the server when `quit` is typed on stdin.
async fn console_loop(stop: StopSignal) {
    println!("Type 'quit' to stop server");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_quit(&line) => {
                tracing::info!("quit requested from console");
                stop.stop();
                return;
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                tracing::debug!("stdin closed, Ctrl-C to stop");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        }
    }
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("quit")
}

/// Database location from `--path`/`--filename`, falling back to the configured one.
///
/// A relative directory is taken relative to `cwd`. A lone filename lands next
/// to the configured database; a lone directory gets the default file name.
fn storage_path(cwd: &Path, dir: Option<&Path>, filename: Option<&str>, configured: &Path) -> PathBuf {
    let dir = dir.map(|d| if d.is_absolute() { d.to_path_buf() } else { cwd.join(d) });
    match (dir, filename) {
        (Some(dir), Some(name)) => dir.join(name),
        (Some(dir), None) => dir.join(DEFAULT_DB_FILENAME),
        (None, Some(name)) => configured
            .parent()
            .map(|p| p.join(name))
            .unwrap_or_else(|| PathBuf::from(name)),
        (None, None) => configured.to_path_buf(),
    }
}
