//! signal-gate
//!
//! Usage:
//!   signal-gate run [--input batch.json] [--config gate.toml] [--db signals.db]
//!   signal-gate serve [--bind 0.0.0.0:3000] [--config gate.toml] [--db signals.db]
//!
//! Environment Variables:
//!   SIGNAL_GATE_CONFIG - Path to TOML config file
//!   SIGNAL_GATE_DB_PATH - SQLite database path
//!   SIGNAL_GATE_BIND - API bind address (serve)
//!   RUST_LOG - Log filter (default: signal_gate=info,tower_http=info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_gate::api::{create_router, AppState};
use signal_gate::signals::HeuristicSignalProducer;
use signal_gate::sources::{decode_batch, HttpSourceClient};
use signal_gate::storage::{CancelFlag, SqliteSignalStore};
use signal_gate::{Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "signal-gate")]
#[command(about = "Quality-gated signal pipeline for sporting-event batches")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, env = "SIGNAL_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true, env = "SIGNAL_GATE_DB_PATH")]
    db: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one batch and exit
    Run {
        /// JSON batch file (array or {"games": [...]}); primary source when absent
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000", env = "SIGNAL_GATE_BIND")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.common.config.as_deref())?;
    if let Some(db) = cli.common.db {
        config.database_path = db;
    }
    info!(
        db = %config.database_path,
        threshold = config.critical_failure_threshold,
        "⚙️ Configuration loaded"
    );

    let store = Arc::new(
        SqliteSignalStore::new(&config.database_path)
            .with_context(|| format!("Failed to open database {}", config.database_path))?,
    );
    let client = Arc::new(HttpSourceClient::new()?);
    let producer = Arc::new(HeuristicSignalProducer::from_config(&config));
    let pipeline = Arc::new(Pipeline::new(config, client, store.clone(), producer));

    match cli.command {
        Command::Run { input } => run_once(&pipeline, input).await,
        Command::Serve { bind } => serve(pipeline, store, &bind).await,
    }
}

async fn run_once(pipeline: &Pipeline, input: Option<PathBuf>) -> Result<()> {
    let cancel = CancelFlag::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ Interrupt received, cancelling run");
            watcher.cancel();
        }
    });

    let report = match input {
        Some(path) => {
            let body = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read batch file {}", path.display()))?;
            let payloads = decode_batch(&body)
                .map_err(|e| anyhow::anyhow!("Invalid batch file {}: {}", path.display(), e))?;
            pipeline.run_batch(payloads, &cancel).await
        }
        None => pipeline.run_from_primary(&cancel).await,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status.is_success() {
        Ok(())
    } else {
        anyhow::bail!("run {} ended as {}", report.run_id, report.status.label())
    }
}

async fn serve(pipeline: Arc<Pipeline>, store: Arc<SqliteSignalStore>, bind: &str) -> Result<()> {
    let app = create_router(AppState { pipeline, store });
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("🚀 signal-gate API listening on {}", bind);
    axum::serve(listener, app).await.context("API server failed")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_gate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
