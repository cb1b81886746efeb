//! Liveness endpoint, served on its own port for load balancer checks.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tracing::{error, info};

/// Router answering `GET /health` and `GET /`; every other path is a 404.
pub fn create_health_router() -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Serves the health router until the process exits. A bind failure is
/// logged and the relay keeps running without it.
pub async fn serve_health(addr: SocketAddr) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind health check listener");
            return;
        }
    };
    info!(%addr, "Health check server listening");
    if let Err(e) = axum::serve(listener, create_health_router()).await {
        error!(error = %e, "Health check server stopped");
    }
}
