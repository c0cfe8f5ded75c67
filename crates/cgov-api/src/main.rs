//! # cgov-api — Binary Entry Point
//!
//! Loads configuration (`CGOV_CONFIG` or defaults, then environment
//! overrides), restores active bundles from the store and serves the API.

use std::path::PathBuf;

use cgov_api::middleware::metrics::ApiMetrics;
use cgov_api::state::AppState;
use cgov_engine::{init_tracing, Engine, EngineConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info", LogFormat::from_env());

    let config_path = std::env::var("CGOV_CONFIG").ok().map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).map_err(|e| {
        tracing::error!("configuration failed: {e}");
        e
    })?;
    let port = config.server.port;

    let engine = Engine::from_config(config).map_err(|e| {
        tracing::error!("engine initialization failed: {e}");
        e
    })?;
    match engine.recover().await {
        Ok(restored) => tracing::info!(restored, "startup recovery complete"),
        Err(e) => tracing::warn!("startup recovery failed, starting without active bundles: {e}"),
    }

    let app = cgov_api::app(AppState::new(engine), ApiMetrics::new()?);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("cgov API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
