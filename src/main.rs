//! Battle Royale Orchestrator - authoritative match lifecycle service
//!
//! This is the main entry point for the orchestrator. It handles:
//! - HTTP control endpoints for creating, starting and ending matches
//! - WebSocket streams of per-match events
//! - Zone, loot and countdown timers for every running match
//! - Supabase persistence of matches, zones and player stats

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use royale_orchestrator::app::AppState;
use royale_orchestrator::config::Config;
use royale_orchestrator::http::build_router;
use royale_orchestrator::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Battle Royale Orchestrator");
    info!("Server address: {}", config.server_addr);
    info!(season = %config.current_season, "Current season");

    // Create application state
    let state = AppState::new(config.clone());

    // Re-arm timers for matches a previous process left running
    match state.orchestrator.resume_active().await {
        Ok(0) => {}
        Ok(resumed) => info!(resumed, "Resumed in-progress matches"),
        Err(e) => error!(error = %e, "Failed to resume in-progress matches"),
    }

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Event stream: ws://{}/matches/:id/events?token=...", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
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
    info!("Match timers stop with the process and resume on next boot");
}
