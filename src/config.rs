//! Runtime configuration
//!
//! Defaults match the well-known mailbox names so independently started
//! servers and clients find each other. Each value can be overridden through
//! the process environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Default server mailbox name
pub const DEFAULT_SERVER_MAILBOX: &str = "/hdp38_njs76_chat_server";

/// Default prefix of every client mailbox name
pub const DEFAULT_CLIENT_PREFIX: &str = "/hdp38_njs76_client_";

/// Default registry capacity
pub const DEFAULT_CAPACITY: usize = 5;

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default gap without heartbeats after which a client gives up
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(15);

/// Default maximum number of queued messages per mailbox
pub const DEFAULT_MAILBOX_DEPTH: usize = 10;

/// How client mailbox names are derived, and therefore whether two
/// processes may share a username
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailboxNaming {
    /// prefix + name; a registered name cannot join twice
    #[default]
    ByName,
    /// prefix + name + `_` + pid; same-named processes coexist
    ByNameAndPid,
}

impl FromStr for MailboxNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(MailboxNaming::ByName),
            "name-pid" => Ok(MailboxNaming::ByNameAndPid),
            other => Err(format!("unknown mailbox naming '{}'", other)),
        }
    }
}

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Well-known server mailbox, also the sender name of heartbeats
    pub server_mailbox: String,
    pub client_prefix: String,
    /// Maximum number of joined users
    pub capacity: usize,
    pub heartbeat_interval: Duration,
    pub naming: MailboxNaming,
    pub mailbox_depth: usize,
    /// How long the mailbox reader blocks before re-checking for shutdown
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_mailbox: DEFAULT_SERVER_MAILBOX.to_string(),
            client_prefix: DEFAULT_CLIENT_PREFIX.to_string(),
            capacity: DEFAULT_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            naming: MailboxNaming::default(),
            mailbox_depth: DEFAULT_MAILBOX_DEPTH,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `MQ_CHAT_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_mailbox: env_string("MQ_CHAT_SERVER_MAILBOX", defaults.server_mailbox),
            client_prefix: env_string("MQ_CHAT_CLIENT_PREFIX", defaults.client_prefix),
            capacity: env_parse("MQ_CHAT_CAPACITY", defaults.capacity),
            // tokio intervals reject a zero period
            heartbeat_interval: Duration::from_secs(
                env_parse("MQ_CHAT_HEARTBEAT_SECS", defaults.heartbeat_interval.as_secs()).max(1),
            ),
            naming: env_parse("MQ_CHAT_NAMING", defaults.naming),
            ..defaults
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_mailbox: String,
    pub client_prefix: String,
    pub naming: MailboxNaming,
    pub liveness_timeout: Duration,
    /// How often the liveness deadline is checked
    pub liveness_check: Duration,
    pub mailbox_depth: usize,
    pub poll_interval: Duration,
    /// Attempts made when the server mailbox is full
    pub send_attempts: u32,
    pub send_backoff: Duration,
    /// How long a mailbox that already existed stays unread after JOIN,
    /// leaving room for a rejection
    pub join_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_mailbox: DEFAULT_SERVER_MAILBOX.to_string(),
            client_prefix: DEFAULT_CLIENT_PREFIX.to_string(),
            naming: MailboxNaming::default(),
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            liveness_check: Duration::from_secs(1),
            mailbox_depth: DEFAULT_MAILBOX_DEPTH,
            poll_interval: Duration::from_millis(250),
            send_attempts: 5,
            send_backoff: Duration::from_millis(50),
            join_grace: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `MQ_CHAT_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_mailbox: env_string("MQ_CHAT_SERVER_MAILBOX", defaults.server_mailbox),
            client_prefix: env_string("MQ_CHAT_CLIENT_PREFIX", defaults.client_prefix),
            naming: env_parse("MQ_CHAT_NAMING", defaults.naming),
            liveness_timeout: Duration::from_secs(env_parse(
                "MQ_CHAT_LIVENESS_SECS",
                defaults.liveness_timeout.as_secs(),
            )),
            ..defaults
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using {:?}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_parse() {
        assert_eq!("name".parse::<MailboxNaming>(), Ok(MailboxNaming::ByName));
        assert_eq!("name-pid".parse::<MailboxNaming>(), Ok(MailboxNaming::ByNameAndPid));
        assert!("pid".parse::<MailboxNaming>().is_err());
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.capacity, 5);
        assert_eq!(config.server_mailbox, DEFAULT_SERVER_MAILBOX);
        assert_eq!(config.naming, MailboxNaming::ByName);
    }

    #[test]
    fn test_liveness_outlasts_heartbeats() {
        let client = ClientConfig::default();
        assert!(client.liveness_timeout > DEFAULT_HEARTBEAT_INTERVAL * 2);
    }

    #[test]
    fn test_env_parse_fallback() {
        // Variable names unique to this test so parallel tests are unaffected
        env::set_var("MQ_CHAT_TEST_BAD_NUMBER", "five");
        assert_eq!(env_parse("MQ_CHAT_TEST_BAD_NUMBER", 5usize), 5);
        env::set_var("MQ_CHAT_TEST_GOOD_NUMBER", "7");
        assert_eq!(env_parse("MQ_CHAT_TEST_GOOD_NUMBER", 5usize), 7);
        assert_eq!(env_parse("MQ_CHAT_TEST_UNSET", 3u64), 3);
    }
}
