//! Message-Queue Chat Broker Library
//!
//! A chat server and client talking over named OS message queues
//! ("mailboxes"). The server keeps a bounded registry of joined users,
//! relays broadcast and private messages, and sends periodic heartbeats so
//! clients can tell when it has gone away.
//!
//! # Features
//! - Fixed-layout binary request/delivery frames
//! - Bounded registry with out-of-band JOIN rejection
//! - Broadcast and private routing with stale-peer eviction
//! - Heartbeats and client-side liveness timeout
//! - Exactly-once mailbox removal on every exit path
//!
//! # Architecture
//! Blocking mailbox reads happen on dedicated reader threads that forward
//! decoded frames into `mpsc` channels:
//! - `ChatServer` owns the registry and runs one event loop over requests,
//!   heartbeat ticks and shutdown signals
//! - `ClientSession` runs one event loop over deliveries, user commands,
//!   control signals and liveness checks
//! - OS signals are forwarded as `ControlSignal` values, never handled by
//!   jumping out of a blocking call
//!
//! # Example
//! ```ignore
//! use tokio::sync::mpsc;
//! use mq_chat::{forward_signals, ChatServer, PosixNamespace, ServerConfig, SignalRejector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mq_chat::AppError> {
//!     let (control_tx, control_rx) = mpsc::channel(8);
//!     forward_signals(control_tx, false)?;
//!
//!     let (server, requests) =
//!         ChatServer::bind(ServerConfig::from_env(), PosixNamespace, SignalRejector)?;
//!     server.run(requests, control_rx).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod menu;
pub mod message;
pub mod posix;
pub mod registry;
pub mod server;
pub mod signals;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use client::{ClientSession, SessionOutcome, SessionState, UserCommand};
pub use config::{ClientConfig, MailboxNaming, ServerConfig};
pub use error::{AppError, CodecError, DeliveryError, TransportError};
pub use mailbox::{Claim, Mailbox, MailboxAttrs, MemoryNamespace, Namespace, OwnedMailbox};
pub use message::{ClientRequest, Control, DeliveryMode, ServerDelivery};
pub use posix::PosixNamespace;
pub use registry::{JoinOutcome, Member, Registry};
pub use server::{ChatServer, ServerEvent};
pub use signals::{forward_signals, ControlSignal, LivenessTracker, RejectReason, Rejector, SignalRejector};
pub use types::{MailboxName, ProcessId};
