//! amqpwire - AMQP 0-10 frame tap
//!
//! Accepts client connections, answers the protocol handshake and logs every
//! frame received. Useful for inspecting what a client puts on the wire.

mod config;
mod tap;

use config::TapConfig;
use std::sync::Arc;
use tap::Tap;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if AMQPWIRE_CONFIG is set, then env overrides)
    let config = match TapConfig::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("AMQPWIRE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting amqpwire tap");
    tracing::info!("  Bind address: {}", config.bind_addr);
    tracing::info!("  Protocol version: {}-{}", config.major, config.minor);
    match config.framer.io_timeout() {
        Some(timeout) => tracing::info!("  I/O timeout: {:?}", timeout),
        None => tracing::info!("  I/O timeout: none"),
    }

    let listener = TcpListener::bind(config.bind_addr).await?;
    let tap = Arc::new(Tap::new(config));

    // Spawn shutdown signal handler
    let shutdown_tap = tap.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping tap...");
        shutdown_tap.shutdown();
    });

    tap.run(listener).await?;

    tracing::info!("Tap stopped");
    Ok(())
}
