//! Crossline Server - authoritative room server for the Crossline arena shooter
//!
//! This is the main entry point. It handles:
//! - WebSocket connections for real-time gameplay
//! - HTTP lobby endpoints (room listing and creation)
//! - Static client files

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crossline_server::app::AppState;
use crossline_server::config::{Config, LogFormat};
use crossline_server::game::RoomRegistry;
use crossline_server::http::build_router;
use crossline_server::util::time::{init_server_time, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env locally; ignored when not present
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("loading configuration")?;

    init_tracing(&config.log_level, config.log_format);
    init_server_time();

    info!("Starting Crossline Server");
    info!("Server address: {}", config.server_addr);

    let registry = Arc::new(RoomRegistry::new(
        Arc::new(config.tuning.clone()),
        Arc::new(SystemClock::new()),
    ));
    registry
        .ensure_default_rooms()
        .context("creating default rooms")?;

    let pruner = tokio::spawn(
        Arc::clone(&registry).run_pruner(config.prune_interval, config.room_idle),
    );

    let addr = config.server_addr;
    let state = AppState::new(config, Arc::clone(&registry));
    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws?room=<id>", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    registry.shutdown_all().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
