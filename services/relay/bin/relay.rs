//! Main Entrypoint for the Sonic Relay Service
//!
//! This binary is responsible for:
//! 1. Loading and validating configuration from the environment.
//! 2. Initializing logging.
//! 3. Initializing the backend connector and the optional tool agent, which
//!    is skipped with an error log if it fails to start.
//! 4. Starting the health check server when a port is configured.
//! 5. Serving the WebSocket relay and handling graceful shutdown.

use anyhow::Context;
use bedrock_realtime::BedrockConnector;
use sonic_core::{ToolAgent, ToolDispatcher};
use sonic_relay::{
    agent::start_tool_agent,
    config::Config,
    health::serve_health,
    logging::init_tracing,
    router::create_router,
    state::AppState,
    ws::{SessionSettings, Supervisor},
};
use std::sync::Arc;
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    init_tracing(config.log_level, config.log_file.as_deref())?;
    info!("Configuration loaded. Initializing collaborators...");

    // --- 3. Initialize Shared Services ---
    let connector = Arc::new(BedrockConnector::from_env(&config.region).await);

    let tool_agent = start_tool_agent(&config).await;

    let supervisor = Arc::new(Supervisor::new(
        SessionSettings::from_config(&config),
        connector,
        ToolDispatcher::new(tool_agent.clone()),
    ));
    let app_state = Arc::new(AppState { supervisor });

    // --- 4. Start Health Check Server ---
    if let Some(health_address) = config.health_address() {
        tokio::spawn(serve_health(health_address));
    }

    // --- 5. Start Server ---
    let ws_address = config.ws_address();
    info!(
        model_id = %config.model_id,
        region = %config.region,
        %ws_address,
        "Service configured. Starting relay..."
    );
    let listener = tokio::net::TcpListener::bind(ws_address)
        .await
        .with_context(|| format!("Failed to bind {ws_address}"))?;

    axum::serve(listener, create_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(agent) = tool_agent {
        agent.close().await;
    }
    info!("Server has shut down.");
    Ok(())
}
