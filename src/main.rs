use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use postpulse::config::Config;
use postpulse::manager::Manager;
use postpulse::receiver::Receiver;

/// Post-interaction analytics aggregation engine.
#[derive(Parser)]
#[command(name = "postpulse", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("postpulse {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            tracing::info!("no config file given, using defaults");
            Config::default()
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting postpulse");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let manager = Arc::new(Manager::new(&cfg).await.context("creating manager")?);
    manager.start().await.context("starting manager")?;

    let receiver = if cfg.receiver.enabled {
        let receiver = Receiver::new(cfg.receiver.clone(), Arc::clone(&manager));
        receiver.start().await.context("starting receiver")?;
        Some(receiver)
    } else {
        tracing::info!("receiver disabled, running aggregation only");
        None
    };

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Stop the inbound side first so the final flush sees every event.
    if let Some(receiver) = &receiver {
        receiver.stop().await;
    }
    manager.stop().await;

    tracing::info!("postpulse stopped");

    Ok(())
}
