//! Chunkyard Server
//!
//! A self-hosted file transfer server that stores uploads as fixed-size
//! chunk files and streams them back on download.

use std::future::IntoFuture;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkyard_server::config::Config;
use chunkyard_server::routes;
use chunkyard_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "chunkyard_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Chunkyard Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage directory: {}", config.storage.dir.display());
    tracing::info!(
        "Transfer mode: {:?}, chunk size: {} bytes, download once: {}",
        config.transfer.mode,
        config.transfer.chunk_size,
        config.transfer.download_once
    );

    let app_state = AppState::new(config.clone());
    let coordinator = app_state.coordinator().clone();

    coordinator
        .prepare()
        .await
        .context("Failed to create storage directories")?;

    // Anything still staged belongs to uploads that died with the last process
    match coordinator.sweep_older_than(std::time::Duration::ZERO).await {
        Ok(report) => tracing::info!("Startup sweep removed {} staging entries", report.removed),
        Err(e) => tracing::warn!("Startup sweep failed: {}", e),
    }
    let sweeper = coordinator.start_sweep_task(config.sweep.interval);

    // Shutdown is shared by both listeners
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST {:?}", config.server.host))?;

    let addr = SocketAddr::new(host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Chunkyard Server listening on {}", addr);

    let progress_addr = SocketAddr::new(host, config.server.progress_port);
    let progress_listener = tokio::net::TcpListener::bind(progress_addr)
        .await
        .with_context(|| format!("Failed to bind {}", progress_addr))?;
    tracing::info!("Progress channel listening on {}", progress_addr);

    let http = axum::serve(listener, routes::app(app_state.clone()))
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();
    let progress = axum::serve(progress_listener, routes::progress::router(app_state))
        .with_graceful_shutdown(wait_for(shutdown_rx))
        .into_future();

    let (http, progress) = tokio::join!(http, progress);
    http.context("HTTP server failed")?;
    progress.context("Progress server failed")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
