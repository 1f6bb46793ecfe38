//! Mailbox transport
//!
//! A mailbox is a named, bounded message queue living in a namespace shared
//! by every participant. Only the owner removes a mailbox; any peer may open
//! one for sending.
//!
//! Two namespaces implement the traits here: `PosixNamespace` (see
//! `crate::posix`) for real processes, and `MemoryNamespace` for a single
//! process, used by the tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::types::MailboxName;

/// Attributes applied when a mailbox is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxAttrs {
    /// Maximum number of queued messages
    pub max_messages: usize,
    /// Maximum size of one message in bytes
    pub message_size: usize,
}

/// An open handle to a mailbox
pub trait Mailbox: Send + 'static {
    /// Queue one message without blocking
    ///
    /// Fails with `TransportError::Full` when the queue is at capacity.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next message
    ///
    /// Returns the number of bytes written into `buf`, or `None` on timeout.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, TransportError>;

    /// Maximum message size of the underlying queue
    fn message_size(&self) -> Result<usize, TransportError>;
}

/// A namespace of named mailboxes
pub trait Namespace: Clone + Send + Sync + 'static {
    type Mailbox: Mailbox;

    /// Create a mailbox, or reopen it if one of this name already exists
    fn create(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<Self::Mailbox, TransportError>;

    /// Create a mailbox that must not exist yet
    ///
    /// Fails with `TransportError::AlreadyExists` if the name is taken.
    fn create_new(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<Self::Mailbox, TransportError>;

    /// Open an existing mailbox for sending
    fn open(&self, name: &MailboxName) -> Result<Self::Mailbox, TransportError>;

    /// Remove a name from the namespace
    fn unlink(&self, name: &MailboxName) -> Result<(), TransportError>;
}

/// How `OwnedMailbox::claim` obtained its mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The name did not exist and was created by us
    Created,
    /// The name already existed; it may belong to a live peer or to a
    /// crashed run
    Adopted,
}

/// Ownership of a mailbox name
///
/// Guarantees the name is removed from the namespace exactly once: either by
/// `release`, or on drop if `release` was never reached.
#[derive(Debug)]
pub struct OwnedMailbox<N: Namespace> {
    namespace: N,
    name: MailboxName,
    released: bool,
}

impl<N: Namespace> OwnedMailbox<N> {
    /// Create (or reopen) the mailbox and take ownership of its name
    pub fn create(
        namespace: N,
        name: MailboxName,
        attrs: MailboxAttrs,
    ) -> Result<(Self, N::Mailbox), TransportError> {
        let mailbox = namespace.create(&name, attrs)?;
        debug!("Created mailbox {}", name);
        let owned = Self {
            namespace,
            name,
            released: false,
        };
        Ok((owned, mailbox))
    }

    /// Create the mailbox exclusively, falling back to reopening it
    ///
    /// An `Adopted` mailbox is still removed on release or drop; callers that
    /// learn the name belongs to someone else must `relinquish` it instead.
    pub fn claim(
        namespace: N,
        name: MailboxName,
        attrs: MailboxAttrs,
    ) -> Result<(Self, N::Mailbox, Claim), TransportError> {
        let (mailbox, claim) = match namespace.create_new(&name, attrs) {
            Ok(mailbox) => (mailbox, Claim::Created),
            Err(TransportError::AlreadyExists(_)) => {
                debug!("Mailbox {} already exists, reopening", name);
                (namespace.create(&name, attrs)?, Claim::Adopted)
            }
            Err(e) => return Err(e),
        };
        let owned = Self {
            namespace,
            name,
            released: false,
        };
        Ok((owned, mailbox, claim))
    }

    pub fn name(&self) -> &MailboxName {
        &self.name
    }

    /// Give up ownership and leave the name in place
    pub fn relinquish(mut self) {
        self.released = true;
        debug!("Left mailbox {} in place", self.name);
    }

    /// Remove the mailbox from the namespace
    pub fn release(mut self) -> Result<(), TransportError> {
        self.released = true;
        self.namespace.unlink(&self.name)?;
        debug!("Removed mailbox {}", self.name);
        Ok(())
    }
}

impl<N: Namespace> Drop for OwnedMailbox<N> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.namespace.unlink(&self.name) {
            warn!("Failed to remove mailbox {}: {}", self.name, e);
        }
    }
}

/// Queue shared by every handle of one in-memory mailbox
#[derive(Debug)]
struct MemoryQueue {
    name: MailboxName,
    attrs: MailboxAttrs,
    messages: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl MemoryQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to an in-memory mailbox
#[derive(Debug, Clone)]
pub struct MemoryMailbox {
    queue: Arc<MemoryQueue>,
}

impl MemoryMailbox {
    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mailbox for MemoryMailbox {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let limit = self.queue.attrs.message_size;
        if payload.len() > limit {
            return Err(TransportError::TooLarge {
                len: payload.len(),
                limit,
            });
        }
        let mut messages = self.queue.lock();
        if messages.len() >= self.queue.attrs.max_messages {
            return Err(TransportError::Full(self.queue.name.clone()));
        }
        messages.push_back(payload.to_vec());
        self.queue.ready.notify_one();
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut messages = self.queue.lock();
        loop {
            if let Some(message) = messages.pop_front() {
                if message.len() > buf.len() {
                    return Err(TransportError::TooLarge {
                        len: message.len(),
                        limit: buf.len(),
                    });
                }
                buf[..message.len()].copy_from_slice(&message);
                return Ok(Some(message.len()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            messages = self
                .queue
                .ready
                .wait_timeout(messages, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn message_size(&self) -> Result<usize, TransportError> {
        Ok(self.queue.attrs.message_size)
    }
}

/// Process-local namespace
///
/// Mirrors POSIX semantics: unlinking removes the name while handles that are
/// already open keep working.
#[derive(Debug, Clone, Default)]
pub struct MemoryNamespace {
    queues: Arc<Mutex<HashMap<MailboxName, Arc<MemoryQueue>>>>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MailboxName, Arc<MemoryQueue>>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check whether a name is currently present
    pub fn exists(&self, name: &MailboxName) -> bool {
        self.lock().contains_key(name)
    }
}

impl Namespace for MemoryNamespace {
    type Mailbox = MemoryMailbox;

    fn create(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<MemoryMailbox, TransportError> {
        let mut queues = self.lock();
        let queue = queues
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(MemoryQueue {
                    name: name.clone(),
                    attrs,
                    messages: Mutex::new(VecDeque::new()),
                    ready: Condvar::new(),
                })
            })
            .clone();
        Ok(MemoryMailbox { queue })
    }

    fn create_new(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<MemoryMailbox, TransportError> {
        if self.exists(name) {
            return Err(TransportError::AlreadyExists(name.clone()));
        }
        self.create(name, attrs)
    }

    fn open(&self, name: &MailboxName) -> Result<MemoryMailbox, TransportError> {
        self.lock()
            .get(name)
            .cloned()
            .map(|queue| MemoryMailbox { queue })
            .ok_or_else(|| TransportError::NotFound(name.clone()))
    }

    fn unlink(&self, name: &MailboxName) -> Result<(), TransportError> {
        self.lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TransportError::NotFound(name.clone()))
    }
}
