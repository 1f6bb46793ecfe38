//! Basic type definitions for the chat broker
//!
//! Provides newtype wrappers for type safety:
//! - `ProcessId`: OS process identifier carried in every request
//! - `MailboxName`: name of a mailbox in the shared OS namespace

use crate::config::MailboxNaming;

/// OS process identifier (newtype pattern)
///
/// The server uses it to deliver JOIN rejections out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub i32);

impl ProcessId {
    /// Identifier of the calling process
    pub fn current() -> Self {
        Self(std::process::id() as i32)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mailbox name in the shared namespace
///
/// Server mailboxes use a single well-known name, client mailboxes
/// derive theirs from a prefix and the username.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxName(pub String);

impl MailboxName {
    /// Wrap an already-complete name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derive a client's mailbox name
    ///
    /// Trailing newlines left over from line input are stripped so the
    /// name matches what the owner created.
    pub fn for_client(prefix: &str, user_name: &str, pid: ProcessId, naming: MailboxNaming) -> Self {
        let user_name = user_name.trim_end_matches(['\n', '\r']);
        match naming {
            MailboxNaming::ByName => Self(format!("{}{}", prefix, user_name)),
            MailboxNaming::ByNameAndPid => Self(format!("{}{}_{}", prefix, user_name, pid)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MailboxName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_mailbox_by_name() {
        let name = MailboxName::for_client("/chat_client_", "alice", ProcessId(42), MailboxNaming::ByName);
        assert_eq!(name.as_str(), "/chat_client_alice");
    }

    #[test]
    fn test_client_mailbox_by_name_and_pid() {
        let name = MailboxName::for_client(
            "/chat_client_",
            "alice",
            ProcessId(42),
            MailboxNaming::ByNameAndPid,
        );
        assert_eq!(name.as_str(), "/chat_client_alice_42");
    }

    #[test]
    fn test_client_mailbox_strips_newline() {
        let name = MailboxName::for_client("/c_", "bob\n", ProcessId(1), MailboxNaming::ByName);
        assert_eq!(name.to_string(), "/c_bob");
    }

    #[test]
    fn test_current_process_id() {
        assert_eq!(ProcessId::current().0 as u32, std::process::id());
    }
}
