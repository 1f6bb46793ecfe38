//! Message-Queue Chat Client - Entry Point
//!
//! Usage: `mq-chat-client <user-name>`
//!
//! Exit status: 0 on exit, 1 if the server cannot be reached, 2 if the server
//! refused the join, 3 if the server stopped sending heartbeats.

use std::env;
use std::io;
use std::process;

use tokio::sync::mpsc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mq_chat::menu::spawn_menu;
use mq_chat::{
    forward_signals, AppError, ClientConfig, ClientSession, PosixNamespace, ProcessId,
    SessionOutcome,
};

/// Channel buffer size for control signals and user commands
const CHANNEL_BUFFER_SIZE: usize = 8;

#[tokio::main]
async fn main() {
    // Logs go to stderr so the chat stays readable on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mq_chat=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "mq-chat-client".to_string());
    let (Some(user_name), None) = (args.next(), args.next()) else {
        eprintln!("Usage: {} user-name", program);
        process::exit(1);
    };

    let outcome = match run(&user_name).await {
        Ok(outcome) => outcome,
        Err(AppError::ServerUnavailable(name)) => {
            eprintln!("Server does not exist ({})", name);
            SessionOutcome::ServerUnavailable
        }
        Err(e) => {
            error!("Chat client failed: {}", e);
            SessionOutcome::TransportFailed
        }
    };
    process::exit(outcome.exit_code());
}

async fn run(user_name: &str) -> Result<SessionOutcome, AppError> {
    let config = ClientConfig::from_env();

    // The server may reject us as soon as the JOIN lands, so listen first
    let (control_tx, control_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    forward_signals(control_tx, true)?;

    let session = ClientSession::connect(
        config,
        PosixNamespace,
        user_name,
        ProcessId::current(),
        Box::new(io::stdout()),
    )
    .await?;

    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    spawn_menu(cmd_tx)?;

    Ok(session.run(cmd_rx, control_rx).await)
}
