//! Quarry Binary Entry Point
//!
//! Runs the worker supervisor, the ledger maintenance job and the control
//! API until Ctrl+C or SIGTERM. Core functionality is provided by the
//! `quarry` library crate.

use clap::Parser;
use quarry::{
    adapter::AdapterRegistry,
    config::{AppConfig, ConfigProvider, FileConfigProvider},
    maintenance::{MaintenanceScheduler, Schedule},
    server::{AppState, create_router},
    storage::{StorageBuilder, StorageHandles},
    worker::WorkerSupervisor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Quarry - periodic missing/upgrade search orchestration
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "QUARRY_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "QUARRY_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "QUARRY_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, env = "QUARRY_DB_URL")]
    db_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quarry=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Quarry - search orchestration for media-library managers");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(url) = cli.db_url {
        config.database.url = url;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, Database: {}",
        config.server.bind,
        config.server.port,
        config.database.url,
    );

    // Build storage layer
    let storage = StorageBuilder::new(&config.database.url)
        .max_connections(config.database.max_connections)
        .retention_hours(config.ledger.retention_hours)
        .build()
        .await?;
    tracing::info!("Storage initialized");

    // Ledger expiration job; checks once immediately
    let maintenance =
        MaintenanceScheduler::new(storage.ledger.clone(), Schedule::from_ledger(&config.ledger)?)
            .await?;
    maintenance.start().await?;

    // Workers re-read the file at the start of every cycle
    let provider: Arc<dyn ConfigProvider> = Arc::new(FileConfigProvider::new(&cli.config));
    let supervisor = WorkerSupervisor::new(
        AdapterRegistry::with_defaults()?,
        storage.clone(),
        Arc::clone(&provider),
        config.supervisor.clone(),
    );
    let started = supervisor.start().await?;
    tracing::info!("Started {} worker(s): {:?}", started.len(), started);

    let app = create_router(AppState {
        storage: storage.clone(),
        supervisor: supervisor.clone(),
        config: provider,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            supervisor,
            maintenance,
            storage,
            config.supervisor.shutdown_timeout,
        ))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a termination signal, then stop workers, the maintenance job
/// and storage in that order.
async fn shutdown_signal(
    supervisor: WorkerSupervisor,
    maintenance: MaintenanceScheduler,
    storage: StorageHandles,
    timeout: Duration,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down workers...");
    if !supervisor.shutdown(timeout).await {
        tracing::warn!("Some workers were aborted");
    }

    tracing::info!("Shutting down maintenance scheduler...");
    if let Err(e) = maintenance.shutdown().await {
        tracing::error!("Failed to shutdown maintenance scheduler: {}", e);
    }

    tracing::info!("Shutting down storage...");
    storage.shutdown().await;
}
