//! keeld — the Keel daemon.
//!
//! # Usage
//!
//! ```text
//! keeld simulate --config keel.toml --masters 3 --workers 5
//! keeld --log-json simulate --masters 1 --workers 2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keel_core::KeelConfig;
use keeld::Simulation;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "keeld", about = "Keel cluster orchestrator daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a whole cluster in this process against an in-memory store.
    Simulate {
        /// Configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of master nodes.
        #[arg(long, default_value = "3")]
        masters: usize,

        /// Number of worker nodes.
        #[arg(long, default_value = "3")]
        workers: usize,

        /// Seconds between node status reports.
        #[arg(long, default_value = "10")]
        report_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,keeld=debug,keel=debug".parse().unwrap());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    match cli.command {
        Command::Simulate {
            config,
            masters,
            workers,
            report_interval,
        } => run_simulation(config, masters, workers, report_interval).await,
    }
}

async fn run_simulation(
    config: Option<PathBuf>,
    masters: usize,
    workers: usize,
    report_interval: u64,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => {
            let config = KeelConfig::from_file(&path)?;
            info!(path = ?path, "configuration loaded");
            config
        }
        None => KeelConfig::default(),
    };
    if masters == 0 {
        anyhow::bail!("a cluster needs at least one master");
    }

    info!(masters, workers, "Keel daemon starting in simulation mode");
    let sim = Simulation::new(config, masters, workers)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = sim.start(shutdown_rx.clone());

    let report = sim.report(Duration::from_secs(report_interval.max(1)), shutdown_rx);
    let signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    };
    tokio::join!(report, signal);

    for handle in handles {
        let _ = handle.await;
    }

    info!("Keel daemon stopped");
    Ok(())
}
