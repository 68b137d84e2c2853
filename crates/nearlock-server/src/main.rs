//! # nearlock-server
//!
//! HTTP server for the nearlock presence detection system.
//!
//! This binary provides:
//! - REST API for presence status, device discovery, and configuration
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package nearlock-server
//!
//! # Production
//! NEARLOCK_ENV=production ./nearlock-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use nearlock_core::runtime::EngineRuntime;
use nearlock_core::MonitorConfig;
use nearlock_server::{api, logging, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("NEARLOCK_ENV")
        .map(|env| env.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    let _log_guards = logging::init(is_production)?;

    info!("Starting nearlock-server");

    let config_path = std::env::var("NEARLOCK_CONFIG")
        .map_or_else(|_| MonitorConfig::default_path(), PathBuf::from);
    let config = MonitorConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!(path = %config_path.display(), "Configuration loaded");

    let runtime = spawn_engine(config.clone()).await?;
    let engine = runtime.handle();

    let app = api::create_router(AppState::new(engine.clone(), config, config_path));

    let port = std::env::var("NEARLOCK_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down engine");
    engine.shutdown().await.ok();
    runtime.join().await?;

    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn spawn_engine(config: MonitorConfig) -> anyhow::Result<EngineRuntime> {
    let transport = nearlock_core::BtleplugTransport::new()
        .await
        .context("connecting to the Bluetooth stack")?;
    Ok(EngineRuntime::spawn(config, transport))
}

#[cfg(not(feature = "bluetooth"))]
async fn spawn_engine(_config: MonitorConfig) -> anyhow::Result<EngineRuntime> {
    anyhow::bail!("built without the `bluetooth` feature; no radio transport available")
}

async fn shutdown_signal() {
    // SIGINT from a terminal or systemd stop both arrive here.
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
