//! Exhaust Monitor - lambda and EGT dashboard backend
//!
//! # Usage
//!
//! ```bash
//! # On the Pi, reading the MCP3008 over spidev
//! ./exhaust-monitor
//!
//! # Anywhere else, with the simulated ADC
//! cargo run --release -- --simulate
//! ```
//!
//! # Environment Variables
//!
//! - `EXHAUST_MONITOR_CONFIG`: Path to the TOML config (default: ./monitor_config.toml)
//! - `EXHAUST_MONITOR_ADDR`: HTTP/WebSocket bind address
//! - `EXHAUST_MONITOR_CORS_ORIGINS`: Comma-separated allowed CORS origins
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe all persistent data on startup (for testing)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use exhaust_monitor::config::defaults::{EVENT_CHANNEL_CAPACITY, TRACKED_SENSOR_IDS};
use exhaust_monitor::config::watcher::{run_config_watcher, ConfigEvent};
use exhaust_monitor::storage::retention_cutoff;
use exhaust_monitor::{
    create_app, open_adc, AppState, ConnectionRegistry, CycleContext, LiveConfig, MonitorConfig,
    SensorSet, SensorStore, SessionState, SledStore,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "exhaust-monitor")]
#[command(about = "Lambda and EGT monitor with a live WebSocket dashboard feed")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default from config: "0.0.0.0:8080")
    #[arg(short, long, env = "EXHAUST_MONITOR_ADDR")]
    addr: Option<String>,

    /// Override the data directory holding the database
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Use the simulated test-pattern ADC instead of the MCP3008
    #[arg(long)]
    simulate: bool,

    /// Reset all persistent data (history, sensor tracking) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Startup helpers
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB").is_ok_and(|val| {
        let val = val.to_lowercase();
        val == "true" || val == "1" || val == "yes"
    })
}

/// Remove the data directory and all its contents.
fn reset_data_directory(data_path: &Path) -> Result<()> {
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("RESET_DB detected, wiping all persistent data");
    warn!("  Removing: {}", data_path.display());
    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;
    warn!("  A fresh database will be created on startup.");
    Ok(())
}

/// Open the store, make sure both tracking rows exist and prune old history.
fn open_store(data_dir: &Path, retention_days: i64) -> Result<Arc<SledStore>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let store = SledStore::open(data_dir).context("Failed to open sensor database")?;

    for sensor_id in TRACKED_SENSOR_IDS {
        if store.ensure_tracking(sensor_id)? {
            info!(sensor = sensor_id, "Created tracking row");
        }
    }

    match retention_cutoff(Utc::now(), retention_days) {
        Some(cutoff) => {
            let pruned = store.prune_before(cutoff)?;
            info!(pruned, retention_days, "Pruned old history");
        }
        None => warn!(
            retention_days,
            "history_retention_days is not a usable positive day count, history not pruned"
        ),
    }
    info!(size_bytes = store.size_bytes(), "✓ Sensor database ready");
    Ok(Arc::new(store))
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    ConfigWatcher,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::ConfigWatcher => write!(f, "ConfigWatcher"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the config file watcher and the task that logs its reloads.
fn spawn_config_watcher(
    task_set: &mut JoinSet<Result<TaskName>>,
    live: LiveConfig,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let (tx, mut rx) = mpsc::channel(8);
        let log_events = async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ConfigEvent::Reloaded(changes) => {
                        for change in &changes {
                            info!(
                                key = %change.key,
                                old = change.old.as_deref().unwrap_or("-"),
                                new = change.new.as_deref().unwrap_or("-"),
                                "[ConfigWatcher] Value changed"
                            );
                        }
                        info!(changes = changes.len(), "[ConfigWatcher] Config reloaded");
                    }
                    ConfigEvent::Error(e) => warn!(error = %e, "[ConfigWatcher] Reload rejected"),
                }
            }
        };
        tokio::join!(run_config_watcher(live, tx, cancel_token), log_events);
        Ok(TaskName::ConfigWatcher)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let (config, config_path) = MonitorConfig::load();
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config.storage.data_dir.clone());
    let server_addr = args.addr.clone().unwrap_or_else(|| config.server.addr.clone());

    // Reset DB check, before any storage initialization
    if should_reset_db(args.reset_db) {
        reset_data_directory(&data_dir)?;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Exhaust Monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (name, channel) in config.channel_map() {
        info!("  {name:<14} → ADC channel {channel}");
    }

    let adc = open_adc(&config.adc, args.simulate).context("Failed to open the ADC")?;
    let store = open_store(&data_dir, config.storage.history_retention_days)?;
    let live = match config_path {
        Some(path) => LiveConfig::with_source(config, path),
        None => LiveConfig::new(config),
    };

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let shared_store: Arc<dyn SensorStore> = store.clone();
    let registry = Arc::new(ConnectionRegistry::new(
        CycleContext {
            sensors: SensorSet::new(adc, live.clone()),
            store: Arc::clone(&shared_store),
            events,
            shutdown: cancel_token.clone(),
        },
        Arc::new(SessionState::default()),
    ));
    let app = create_app(AppState::new(Arc::clone(&registry), shared_store, live.clone()));

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {server_addr}"))?;
    info!("✓ Dashboard feed listening on ws://{}/ws", server_addr);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_config_watcher(&mut task_set, live, cancel_token.clone());

    let outcome = run_supervisor(&mut task_set, cancel_token.clone()).await;

    registry.shutdown();
    let drain = async { while task_set.join_next().await.is_some() {} };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("Tasks still running after 5s, aborting");
        task_set.abort_all();
    }

    match store.flush() {
        Ok(()) => info!("✓ Sensor database flushed"),
        Err(e) => error!(error = %e, "Failed to flush sensor database"),
    }

    outcome?;
    info!("✓ Exhaust Monitor shutdown complete");
    Ok(())
}
