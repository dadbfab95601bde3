//! TASLink - Main Entry Point
//!
//! Replays recorded controller input on a real console through the TASLink
//! serial adapter.
//!
//! # Usage
//!
//! ```bash
//! taslink /dev/ttyUSB0
//! taslink /dev/ttyUSB0 smb.toml smb2.toml
//! taslink COM3 --config taslink.toml
//! taslink none --dry-run
//! ```

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use taslink_rs::backend::{LinkBackend, SerialLink, SerialPortLink};
use taslink_rs::config::Settings;
use taslink_rs::shell::{Command, Shell};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "taslink")]
#[command(author, version, about = "Replay controller input through the TASLink adapter")]
struct Args {
    /// Serial device of the adapter (e.g. /dev/ttyUSB0 or COM3)
    interface: String,

    /// Saved runs to load at startup
    run_files: Vec<PathBuf>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Use an in-memory link instead of the adapter
    #[arg(long)]
    dry_run: bool,
}

fn open_link(args: &Args, settings: &Settings) -> Result<Box<dyn SerialLink>> {
    if args.dry_run {
        #[cfg(feature = "mock-link")]
        {
            tracing::info!("Dry run: no adapter, writes are discarded");
            return Ok(Box::new(taslink_rs::backend::MockLink::new().discarding_writes()));
        }
        #[cfg(not(feature = "mock-link"))]
        anyhow::bail!("--dry-run needs the mock-link feature");
    }

    let link = SerialPortLink::open(&args.interface, &settings.link).with_context(|| {
        let ports = SerialPortLink::available_ports();
        if ports.is_empty() {
            format!("Cannot use {}", args.interface)
        } else {
            format!("Cannot use {} (available: {})", args.interface, ports.join(", "))
        }
    })?;
    Ok(Box::new(link))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Log to stderr without ever blocking the engine thread
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,taslink_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();

    tracing::info!("Starting TASLink on {}", args.interface);

    let settings = Settings::resolve(args.config.as_deref()).context("Failed to load settings")?;
    let link = open_link(&args, &settings)?;

    let (backend, handle) = LinkBackend::new(link, &settings).context("Failed to initialize the adapter")?;
    let engine_thread = backend.spawn()?;

    let mut shell = Shell::new(handle.clone(), std::io::stdout());
    for path in &args.run_files {
        if let Err(e) = shell.execute(Command::Load(path.clone())) {
            if e.is_fatal() {
                handle.shutdown();
                let _ = engine_thread.join();
                return Err(e.into());
            }
            tracing::error!("Failed to load {:?}: {}", path, e);
        }
    }

    let result = shell.run(BufReader::new(std::io::stdin()));

    tracing::info!("Shutting down...");
    handle.shutdown();
    if engine_thread.join().is_err() {
        tracing::error!("Stream engine thread panicked");
    }

    result.map_err(Into::into)
}
