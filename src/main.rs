//! EGS Control Plane service
//!
//! Drives the field of lamp actuators through the edge bridge and serves
//! the operator HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (edge bridge at 192.168.4.1:9000)
//! cargo run --release
//!
//! # Point at a different bridge and bind address
//! EGS_CONFIG=site.toml cargo run --release -- --addr 0.0.0.0:8080
//! ```
//!
//! # Environment Variables
//!
//! - `EGS_CONFIG`: Path to the TOML configuration file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use egs_control::api::{create_app, ApiState};
use egs_control::config::EgsConfig;
use egs_control::gateway::{assertion, pipeline, SyncState, ZoneOrchestrator, ZoneRegistry};
use egs_control::storage::{EventLog, LampStateStore, WeatherStore};
use egs_control::weather::{self, LoggerClient, WeatherCache};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "egs-control")]
#[command(about = "Emergency Guidance System control plane")]
#[command(version)]
struct CliArgs {
    /// Override the HTTP bind address (default from config, 0.0.0.0:8080)
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Disable the weather poller (gateway control only)
    #[arg(long)]
    no_weather: bool,

    /// Override the data directory for persistent stores
    #[arg(long)]
    data_dir: Option<String>,
}

/// Names for supervised tasks, for shutdown reporting.
#[derive(Debug)]
enum TaskName {
    HttpServer,
    PipelineWorker,
    AssertionLoop,
    WeatherPoller,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = EgsConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if args.no_weather {
        config.weather.enabled = false;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  EGS Control Plane");
    info!("  Emergency Guidance System");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        edge_bridge = %format!("{}:{}", config.gateway.host, config.gateway.port),
        server = %config.server.addr,
        "Starting"
    );

    // Persistent stores
    let db = sled::open(&config.storage.data_dir)
        .with_context(|| format!("Failed to open data directory {}", config.storage.data_dir))?;
    let lamp_store = LampStateStore::open(&db).context("Failed to open lamp state store")?;
    let event_log = EventLog::open(&db).context("Failed to open emergency event log")?;
    let weather_store = WeatherStore::open(&db).context("Failed to open weather store")?;

    // Shared gateway state
    let registry = Arc::new(ZoneRegistry::default());
    let sync_state = Arc::new(SyncState::default());
    let weather_cache: WeatherCache = Arc::new(Mutex::new(None));

    // Command pipeline: one worker owns the socket to the edge bridge
    let (pipeline_handle, pipeline_worker) = pipeline::channel(config.gateway.clone());

    let orchestrator = Arc::new(ZoneOrchestrator::new(
        pipeline_handle.clone(),
        Arc::clone(&registry),
        Arc::clone(&sync_state),
        Some(lamp_store),
        Some(event_log),
        config.changeover.clone(),
    ));

    let app = create_app(ApiState {
        orchestrator: Arc::clone(&orchestrator),
        weather_store: Some(weather_store.clone()),
        weather_cache: Arc::clone(&weather_cache),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.addr))?;
    info!("HTTP server listening on {}", config.server.addr);

    // Graceful shutdown on Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // JoinSet supervisor
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP server
    let http_cancel = cancel_token.clone();
    task_set.spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;
        result
            .map(|()| TaskName::HttpServer)
            .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
    });

    // Task 2: Pipeline worker
    let worker_cancel = cancel_token.clone();
    task_set.spawn(async move {
        pipeline_worker.run(worker_cancel).await;
        Ok(TaskName::PipelineWorker)
    });

    // Task 3: Assertion loop
    let assertion_cancel = cancel_token.clone();
    let assertion_config = config.assertion.clone();
    let assertion_registry = Arc::clone(&registry);
    let assertion_sync = Arc::clone(&sync_state);
    task_set.spawn(async move {
        assertion::run(
            pipeline_handle,
            assertion_registry,
            assertion_sync,
            assertion_config,
            assertion_cancel,
        )
        .await;
        Ok(TaskName::AssertionLoop)
    });

    // Task 4: Weather poller (optional)
    if config.weather.enabled {
        let weather_cancel = cancel_token.clone();
        let weather_config = config.weather.clone();
        let client = LoggerClient::from_config(&weather_config);
        task_set.spawn(async move {
            weather::run_poller(client, weather_store, weather_cache, weather_config, weather_cancel)
                .await;
            Ok(TaskName::WeatherPoller)
        });
    } else {
        info!("Weather poller disabled");
    }

    // Supervise: first task to exit (or fail) brings the rest down.
    while let Some(joined) = task_set.join_next().await {
        match joined {
            Ok(Ok(name)) => info!(task = ?name, "Task finished"),
            Ok(Err(e)) => {
                error!(error = %e, "Task failed, shutting down");
                cancel_token.cancel();
            }
            Err(e) => {
                error!(error = %e, "Task panicked, shutting down");
                cancel_token.cancel();
            }
        }
        if !cancel_token.is_cancelled() {
            cancel_token.cancel();
        }
    }

    info!("EGS control plane shutdown complete");
    Ok(())
}
