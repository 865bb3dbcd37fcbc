use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::routing::get;
use axum::Router;
use dbgp_bridge_core::{Bridge, BridgeConfig};
use tokio::net::TcpListener;

mod engine;
mod ws;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::from_env();
    let bridge = Arc::new(Bridge::new(&config));

    let engine_listener = TcpListener::bind(&config.engine_addr)
        .await
        .with_context(|| format!("failed to bind engine listener on {}", config.engine_addr))?;
    tracing::info!("Waiting for debug engines on {}", config.engine_addr);
    tokio::spawn(engine::serve(engine_listener, bridge.clone()));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(bridge);

    let viewer_listener = TcpListener::bind(&config.viewer_addr)
        .await
        .with_context(|| format!("failed to bind viewer listener on {}", config.viewer_addr))?;
    tracing::info!("Viewers connect to ws://{}/ws", config.viewer_addr);

    axum::serve(viewer_listener, app)
        .await
        .context("viewer server failed")?;

    Ok(())
}
