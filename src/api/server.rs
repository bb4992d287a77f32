use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::delegate::{LocalDelegate, default_engines};
use super::services::{analyze_get, analyze_post, analyze_rpc, health};
use super::state::AppState;
use crate::config::Config;
use crate::server::{AnyError, serve};

/// Public routes: the analyze contract plus its legacy query form
pub fn gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/resource/analyze", post(analyze_post).get(analyze_get))
        .route("/health", get(health))
        .with_state(state)
        // Bodies may arrive gzip-encoded
        .layer(RequestDecompressionLayer::new())
}

/// Analyzer service routes. Always analyzes in-process.
pub fn analyzer_router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_rpc))
        .route("/health", get(health))
        .with_state(state)
        .layer(RequestDecompressionLayer::new())
}

pub async fn run_gateway(address: SocketAddr, config: Config) -> Result<(), AnyError> {
    info!(
        delegation = config.delegation.mode.as_str(),
        turnstile = config.turnstile.enabled,
        rate_limit = config.rate_limit.max_requests,
        "Starting gateway"
    );
    let state = AppState::from_config(config)?;
    serve(address, gateway_router(state), "gateway").await
}

pub async fn run_analyzer(address: SocketAddr, config: Config) -> Result<(), AnyError> {
    info!(
        chunk_size = %config.analyzer.chunk_size,
        max_bytes = %config.fetch.max_bytes,
        "Starting analyzer service"
    );
    let delegate = Arc::new(LocalDelegate::new(&config, default_engines())?);
    let state = AppState::new(config, delegate)?;
    serve(address, analyzer_router(state), "analyzer").await
}
