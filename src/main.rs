//! # Sync Gateway
//!
//! Real-time synchronization gateway server.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Redis backplane connection
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use sync_gateway::config::Settings;
use sync_gateway::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    sync_gateway::telemetry::init_tracing();

    info!("Starting Sync Gateway...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
