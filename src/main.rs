//! # ReelChat
//!
//! A movie-social chat backend implemented in Rust.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Database connection pool and Redis client
//! - Broker supervision, presence hub, and push pipeline
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use reelchat::config::Settings;
use reelchat::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    reelchat::telemetry::init_tracing();

    info!("Starting ReelChat...");

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
