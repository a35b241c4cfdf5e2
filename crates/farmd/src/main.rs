//! farmd — the farmgrid daemon.
//!
//! Assembles the farm around a simulated world:
//! - Counter store (redb, or in memory)
//! - Metrics collector
//! - Orchestrator (target loops, allocation gate, share workload)
//!
//! # Usage
//!
//! ```text
//! farmd simulate --workers 12 --targets 8 --seconds 300
//! farmd check-config --config farm.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farm_core::FarmConfig;
use farmgrid_driver::Orchestrator;
use farmgrid_metrics::MetricsCollector;
use farmgrid_sim::SimEnvironment;
use farmgrid_state::CounterStore;

#[derive(Parser)]
#[command(name = "farmd", about = "farmgrid batch farm daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Farm a generated simulated world until the time runs out or Ctrl-C.
    Simulate {
        /// TOML configuration; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Purchased worker servers besides `home`.
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Targets in the generated world.
        #[arg(long, default_value = "6")]
        targets: usize,

        /// How long to run, in seconds.
        #[arg(long, default_value = "120")]
        seconds: u64,

        /// Persist counters here instead of the configured `driver.state_path`.
        #[arg(long)]
        state_path: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            workers,
            targets,
            seconds,
            state_path,
            json_logs,
        } => {
            init_tracing(json_logs);
            let config = load_config(config.as_deref())?;
            run_simulation(config, workers, targets, seconds, state_path).await
        }
        Command::CheckConfig { config } => {
            init_tracing(false);
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries the command's output.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,farmd=debug,farmgrid=debug"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FarmConfig> {
    match path {
        Some(path) => FarmConfig::from_file(path),
        None => Ok(FarmConfig::default()),
    }
}

async fn run_simulation(
    config: FarmConfig,
    workers: usize,
    targets: usize,
    seconds: u64,
    state_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(workers, targets, seconds, "farmd starting in simulation mode");

    // ── Initialize subsystems ──────────────────────────────────

    let state_path = state_path.or_else(|| config.driver.state_path.as_ref().map(PathBuf::from));
    let store = match &state_path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let store = CounterStore::open(path)?;
            info!(path = ?path, "counter store opened");
            store
        }
        None => CounterStore::open_in_memory()?,
    };
    let metrics = MetricsCollector::new(store)?;

    let env = Arc::new(SimEnvironment::generated(workers, targets));
    let orchestrator = Orchestrator::new(env, config, metrics)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(orchestrator.run(shutdown_rx));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
            info!("simulation time elapsed");
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown signal received");
        }
    }
    let _ = shutdown_tx.send(true);

    let snapshot = handle.await??;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    info!(
        batches = snapshot.batches_completed,
        total_yield = snapshot.total_yield,
        "farmd stopped"
    );
    Ok(())
}
