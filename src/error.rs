//! Error types for the chat broker
//!
//! Defines transport, codec and delivery errors plus the application-level
//! error that binaries report. Uses thiserror for ergonomic error definitions.

use nix::errno::Errno;
use thiserror::Error;

use crate::types::MailboxName;

/// Application-level errors
///
/// Anything that reaches `main` is fatal to the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// Mailbox create/open/unlink failure (fatal)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// The server's well-known mailbox does not exist
    #[error("Server mailbox {0} not found")]
    ServerUnavailable(MailboxName),
}

/// Mailbox transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No mailbox with this name exists in the namespace
    #[error("mailbox {0} does not exist")]
    NotFound(MailboxName),

    /// The mailbox already holds its maximum number of messages
    #[error("mailbox {0} is full")]
    Full(MailboxName),

    /// Exclusive creation found the name already present
    #[error("mailbox {0} already exists")]
    AlreadyExists(MailboxName),

    /// Payload exceeds the mailbox's message size
    #[error("message of {len} bytes exceeds mailbox limit of {limit} bytes")]
    TooLarge { len: usize, limit: usize },

    /// Any other OS-level failure
    #[error("{op} on {name} failed: {source}")]
    Os {
        op: &'static str,
        name: MailboxName,
        #[source]
        source: Errno,
    },
}

/// Wire format errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame length does not match the fixed layout
    #[error("expected a {expected}-byte frame, got {actual} bytes")]
    WrongSize { expected: usize, actual: usize },

    /// Unknown control discriminant
    #[error("invalid control value {0}")]
    InvalidControl(i32),

    /// Unknown delivery mode discriminant
    #[error("invalid delivery mode {0}")]
    InvalidDeliveryMode(i32),
}

/// Per-recipient delivery failures seen by the router
///
/// Never fatal: the router recovers from each of these locally.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Recipient mailbox is gone; the peer is treated as disconnected
    #[error("recipient {0} unreachable")]
    Unreachable(MailboxName),

    /// Recipient mailbox is full; this message is dropped
    #[error("recipient {0} mailbox full")]
    Full(MailboxName),

    /// Any other transport failure
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(name) => DeliveryError::Unreachable(name),
            TransportError::Full(name) => DeliveryError::Full(name),
            other => DeliveryError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_unreachable() {
        let err: DeliveryError = TransportError::NotFound(MailboxName::new("/x")).into();
        assert!(matches!(err, DeliveryError::Unreachable(name) if name.as_str() == "/x"));
    }

    #[test]
    fn test_full_maps_to_full() {
        let err: DeliveryError = TransportError::Full(MailboxName::new("/x")).into();
        assert!(matches!(err, DeliveryError::Full(_)));
    }

    #[test]
    fn test_os_error_display() {
        let err = TransportError::Os {
            op: "mq_open",
            name: MailboxName::new("/srv"),
            source: Errno::EACCES,
        };
        assert!(err.to_string().starts_with("mq_open on /srv failed"));
    }
}
