//! Message-Queue Chat Server - Entry Point
//!
//! Creates the well-known server mailbox and runs the ChatServer event loop
//! until interrupted.

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mq_chat::{forward_signals, ChatServer, PosixNamespace, ServerConfig, SignalRejector};

/// Channel buffer size for control signals
const CONTROL_BUFFER_SIZE: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=mq_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mq_chat=info")),
        )
        .init();

    let config = ServerConfig::from_env();

    // Install signal handlers before the mailbox exists
    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER_SIZE);
    forward_signals(control_tx, false)?;

    let (server, requests) = ChatServer::bind(config, PosixNamespace, SignalRejector)?;
    info!("ChatServer started");

    server.run(requests, control_rx).await?;

    info!("Server gracefully shut down");
    Ok(())
}
