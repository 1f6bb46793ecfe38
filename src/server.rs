//! ChatServer event loop
//!
//! The single owner of the registry. One loop waits on three event sources
//! (inbound requests, the heartbeat timer, shutdown signals) and hands each
//! event to one dispatcher. Since the loop is the only mutator, the registry
//! needs no lock.

use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{MailboxNaming, ServerConfig};
use crate::error::{AppError, DeliveryError};
use crate::mailbox::{Mailbox, MailboxAttrs, Namespace, OwnedMailbox};
use crate::message::{
    truncated, ClientRequest, Control, DeliveryMode, ServerDelivery, REQUEST_SIZE, USER_NAME_LEN,
};
use crate::registry::{JoinOutcome, Member, Registry};
use crate::signals::{ControlSignal, RejectReason, Rejector};
use crate::types::{MailboxName, ProcessId};
use crate::worker;

/// Notice sent back to the sender of an undeliverable private message
pub const RECIPIENT_NOT_FOUND: &str = "Cannot find recipient";

/// Buffer between the mailbox reader and the event loop
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum ServerEvent {
    /// A request arrived on the server mailbox
    Request(ClientRequest),
    /// The heartbeat timer fired
    Heartbeat,
    /// Interrupt, quit or terminate
    Shutdown,
}

/// The chat server
///
/// Generic over the mailbox namespace and the out-of-band rejection channel
/// so the whole router runs in-process under test.
pub struct ChatServer<N: Namespace, R: Rejector> {
    config: ServerConfig,
    namespace: N,
    rejector: R,
    registry: Registry,
    /// Ownership of the well-known server mailbox
    mailbox: OwnedMailbox<N>,
}

impl<N: Namespace, R: Rejector> ChatServer<N, R> {
    /// Create the server mailbox and start reading it
    ///
    /// Returns the server and the channel of decoded requests for `run`.
    pub fn bind(
        config: ServerConfig,
        namespace: N,
        rejector: R,
    ) -> Result<(Self, mpsc::Receiver<ClientRequest>), AppError> {
        let name = MailboxName::new(config.server_mailbox.clone());
        let attrs = MailboxAttrs {
            max_messages: config.mailbox_depth,
            message_size: REQUEST_SIZE,
        };
        let (owned, mailbox) = OwnedMailbox::create(namespace.clone(), name.clone(), attrs)?;

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        worker::spawn_reader(
            name.to_string(),
            mailbox,
            ClientRequest::decode,
            tx,
            config.poll_interval,
        )?;

        let server = Self {
            registry: Registry::new(config.capacity),
            config,
            namespace,
            rejector,
            mailbox: owned,
        };
        Ok((server, rx))
    }

    /// Sender name used for heartbeats and system notices
    pub fn identity(&self) -> &str {
        &self.config.server_mailbox
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run the event loop until shutdown
    ///
    /// Removes the server mailbox on the way out. Fails if the mailbox reader
    /// stopped underneath the loop.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<ClientRequest>,
        mut control: mpsc::Receiver<ControlSignal>,
    ) -> Result<(), AppError> {
        info!(
            "ChatServer listening on {} (capacity {})",
            self.mailbox.name(),
            self.registry.capacity()
        );

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reader_failed = false;

        loop {
            let event = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => ServerEvent::Request(request),
                    None => {
                        error!("Request reader stopped");
                        reader_failed = true;
                        ServerEvent::Shutdown
                    }
                },
                _ = heartbeat.tick() => ServerEvent::Heartbeat,
                Some(signal) = control.recv() => match signal {
                    ControlSignal::Interrupt => ServerEvent::Shutdown,
                    ControlSignal::Reject(_) => continue,
                },
            };

            if self.dispatch(event).is_break() {
                break;
            }
        }

        self.shutdown()?;
        if reader_failed {
            return Err(AppError::ChannelSend);
        }
        Ok(())
    }

    /// Handle one event
    pub fn dispatch(&mut self, event: ServerEvent) -> ControlFlow<()> {
        match event {
            ServerEvent::Request(request) => self.handle_request(request),
            ServerEvent::Heartbeat => self.send_heartbeats(),
            ServerEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Release the server mailbox
    ///
    /// Registered clients are not told; they notice the missing heartbeats.
    pub fn shutdown(self) -> Result<(), AppError> {
        info!(
            "ChatServer shutting down with {} client(s) registered",
            self.registry.len()
        );
        self.mailbox.release()?;
        Ok(())
    }

    /// Control processing, then routing against the updated registry
    pub fn handle_request(&mut self, request: ClientRequest) {
        match request.control {
            Control::Join => {
                if !self.handle_join(&request) {
                    return;
                }
            }
            Control::Leave => self.handle_leave(&request),
            Control::None => {}
        }

        match request.delivery_mode {
            DeliveryMode::Private => self.handle_private(&request),
            DeliveryMode::Broadcast => self.handle_broadcast(&request),
            DeliveryMode::None => {}
        }
    }

    /// Register the sender; false if the join was refused
    fn handle_join(&mut self, request: &ClientRequest) -> bool {
        if request.user_name == truncated(self.identity(), USER_NAME_LEN) {
            info!(
                "Refusing {} (process {}): name is reserved",
                request.user_name, request.process_id
            );
            self.rejector.reject(request.process_id, RejectReason::NameTaken);
            return false;
        }

        let unique_names = self.config.naming == MailboxNaming::ByName;
        if unique_names {
            self.evict_dead_holder(&request.user_name);
        }

        let member = Member::new(request.user_name.clone(), request.process_id);
        match self.registry.join(member, unique_names) {
            JoinOutcome::Joined(slot) => {
                info!(
                    "{} joined in slot {} ({}/{})",
                    request.user_name,
                    slot,
                    self.registry.len(),
                    self.registry.capacity()
                );
                true
            }
            JoinOutcome::Full => {
                info!(
                    "Server full, rejecting {} (process {})",
                    request.user_name, request.process_id
                );
                self.rejector.reject(request.process_id, RejectReason::Full);
                false
            }
            JoinOutcome::DuplicateName => {
                info!(
                    "Name {} already taken, rejecting process {}",
                    request.user_name, request.process_id
                );
                self.rejector.reject(request.process_id, RejectReason::NameTaken);
                false
            }
        }
    }

    /// Clear a slot whose process died without sending LEAVE
    fn evict_dead_holder(&mut self, name: &str) {
        let Some(holder) = self.registry.find(name).cloned() else {
            return;
        };
        if self.rejector.is_alive(holder.pid) {
            return;
        }
        info!(
            "{} (process {}) is gone, freeing its slot",
            holder.name, holder.pid
        );
        self.registry.leave(&holder.name, holder.pid);
    }

    fn handle_leave(&mut self, request: &ClientRequest) {
        if self.registry.leave(&request.user_name, request.process_id) {
            info!(
                "{} left ({}/{})",
                request.user_name,
                self.registry.len(),
                self.registry.capacity()
            );
        } else {
            debug!("LEAVE from unregistered {}, ignoring", request.user_name);
        }
    }

    fn handle_private(&mut self, request: &ClientRequest) {
        let recipient_name = request.recipient_name.trim_end_matches(['\n', '\r']);

        if let Some(recipient) = self.registry.find(recipient_name).cloned() {
            let target = self.mailbox_of(&recipient.name, recipient.pid);
            let delivery = ServerDelivery::new(&request.user_name, &request.body);
            match self.deliver(&target, &delivery) {
                Ok(()) => {
                    debug!("Private message {} -> {}", request.user_name, recipient.name);
                    return;
                }
                Err(DeliveryError::Unreachable(_)) => {
                    warn!("{} is unreachable, treating as disconnected", recipient.name);
                    self.registry.leave(&recipient.name, recipient.pid);
                }
                Err(e) => {
                    warn!("Private message to {} dropped: {}", recipient.name, e);
                    return;
                }
            }
        } else {
            debug!(
                "Private message from {} to unknown user {}",
                request.user_name, recipient_name
            );
        }

        let sender = self.mailbox_of(&request.user_name, request.process_id);
        let notice = ServerDelivery::new(self.identity(), RECIPIENT_NOT_FOUND);
        if let Err(e) = self.deliver(&sender, &notice) {
            debug!("Could not notify {}: {}", request.user_name, e);
        }
    }

    fn handle_broadcast(&mut self, request: &ClientRequest) {
        let sender = Member::new(request.user_name.clone(), request.process_id);
        if !self.registry.members().any(|m| *m == sender) {
            debug!("Broadcast from unregistered {}, ignoring", request.user_name);
            return;
        }

        let recipients: Vec<Member> = self
            .registry
            .members()
            .filter(|m| **m != sender)
            .cloned()
            .collect();
        let delivery = ServerDelivery::new(&request.user_name, &request.body);

        debug!(
            "Broadcast from {} to {} recipient(s)",
            request.user_name,
            recipients.len()
        );

        for recipient in recipients {
            let target = self.mailbox_of(&recipient.name, recipient.pid);
            match self.deliver(&target, &delivery) {
                Ok(()) => {}
                Err(DeliveryError::Unreachable(_)) => {
                    warn!("{} is unreachable, treating as disconnected", recipient.name);
                    self.registry.leave(&recipient.name, recipient.pid);
                }
                Err(e) => {
                    warn!("Broadcast to {} dropped: {}", recipient.name, e);
                }
            }
        }
    }

    /// Send an empty delivery to every registered client
    ///
    /// Failures are logged only; slots are not cleared here.
    pub fn send_heartbeats(&self) {
        debug!("Sending heartbeat to {} client(s)", self.registry.len());
        let heartbeat = ServerDelivery::heartbeat(self.identity());
        for member in self.registry.members() {
            let target = self.mailbox_of(&member.name, member.pid);
            if let Err(e) = self.deliver(&target, &heartbeat) {
                warn!("Heartbeat to {} failed: {}", member.name, e);
            }
        }
    }

    fn mailbox_of(&self, name: &str, pid: ProcessId) -> MailboxName {
        MailboxName::for_client(&self.config.client_prefix, name, pid, self.config.naming)
    }

    fn deliver(&self, target: &MailboxName, delivery: &ServerDelivery) -> Result<(), DeliveryError> {
        let mailbox = self.namespace.open(target)?;
        mailbox.send(&delivery.encode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::mailbox::{MemoryMailbox, MemoryNamespace};
    use crate::message::DELIVERY_SIZE;

    const PREFIX: &str = "/test_client_";
    const SERVER: &str = "/test_server";

    /// Records rejected processes instead of signalling them
    ///
    /// Every process counts as alive unless marked dead.
    #[derive(Clone, Default)]
    struct RecordingRejector {
        rejected: Arc<Mutex<Vec<(ProcessId, RejectReason)>>>,
        dead: Arc<Mutex<HashSet<ProcessId>>>,
    }

    impl RecordingRejector {
        fn rejected(&self) -> Vec<ProcessId> {
            self.rejected.lock().unwrap().iter().map(|(pid, _)| *pid).collect()
        }

        fn reasons(&self) -> Vec<RejectReason> {
            self.rejected.lock().unwrap().iter().map(|(_, reason)| *reason).collect()
        }

        fn kill(&self, pid: i32) {
            self.dead.lock().unwrap().insert(ProcessId(pid));
        }
    }

    impl Rejector for RecordingRejector {
        fn reject(&self, pid: ProcessId, reason: RejectReason) {
            self.rejected.lock().unwrap().push((pid, reason));
        }

        fn is_alive(&self, pid: ProcessId) -> bool {
            !self.dead.lock().unwrap().contains(&pid)
        }
    }

    type TestServer = ChatServer<MemoryNamespace, RecordingRejector>;

    fn config(capacity: usize, naming: MailboxNaming) -> ServerConfig {
        ServerConfig {
            server_mailbox: SERVER.to_string(),
            client_prefix: PREFIX.to_string(),
            capacity,
            naming,
            poll_interval: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    fn setup_with(
        capacity: usize,
        naming: MailboxNaming,
    ) -> (TestServer, MemoryNamespace, RecordingRejector, mpsc::Receiver<ClientRequest>) {
        let ns = MemoryNamespace::new();
        let rejector = RecordingRejector::default();
        let (server, rx) = ChatServer::bind(config(capacity, naming), ns.clone(), rejector.clone()).unwrap();
        (server, ns, rejector, rx)
    }

    fn setup(capacity: usize) -> (TestServer, MemoryNamespace, RecordingRejector, mpsc::Receiver<ClientRequest>) {
        setup_with(capacity, MailboxNaming::ByName)
    }

    /// Create a client mailbox and register the client
    fn join(server: &mut TestServer, ns: &MemoryNamespace, name: &str, pid: i32) -> MemoryMailbox {
        let mailbox = client_mailbox(ns, name, pid, MailboxNaming::ByName);
        server.handle_request(ClientRequest::join(ProcessId(pid), name));
        mailbox
    }

    fn client_mailbox(ns: &MemoryNamespace, name: &str, pid: i32, naming: MailboxNaming) -> MemoryMailbox {
        let attrs = MailboxAttrs {
            max_messages: 10,
            message_size: DELIVERY_SIZE,
        };
        ns.create(&MailboxName::for_client(PREFIX, name, ProcessId(pid), naming), attrs)
            .unwrap()
    }

    fn drain(mailbox: &MemoryMailbox) -> Vec<ServerDelivery> {
        let mut buf = vec![0u8; DELIVERY_SIZE];
        let mut out = Vec::new();
        while let Some(len) = mailbox.receive(&mut buf, Duration::ZERO).unwrap() {
            out.push(ServerDelivery::decode(&buf[..len]).unwrap());
        }
        out
    }

    fn names(server: &TestServer) -> Vec<String> {
        server.registry().members().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn test_bind_creates_server_mailbox() {
        let (_server, ns, _, _rx) = setup(5);
        assert!(ns.exists(&MailboxName::new(SERVER)));
    }

    #[test]
    fn test_joins_up_to_capacity() {
        let (mut server, ns, rejector, _rx) = setup(3);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            join(&mut server, &ns, name, i as i32 + 1);
        }

        assert_eq!(server.registry().len(), 3);
        assert!(rejector.rejected().is_empty());
    }

    #[test]
    fn test_join_over_capacity_rejects_only_requester() {
        let (mut server, ns, rejector, _rx) = setup(2);
        join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        let carol = join(&mut server, &ns, "carol", 3);

        assert_eq!(server.registry().len(), 2);
        assert_eq!(names(&server), vec!["alice", "bob"]);
        assert_eq!(rejector.rejected(), vec![ProcessId(3)]);
        assert_eq!(rejector.reasons(), vec![RejectReason::Full]);
        // Rejection is out-of-band, nothing lands in the mailbox
        assert!(carol.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected_by_name_policy() {
        let (mut server, ns, rejector, _rx) = setup(5);
        join(&mut server, &ns, "alice", 1);
        server.handle_request(ClientRequest::join(ProcessId(2), "alice"));

        assert_eq!(server.registry().len(), 1);
        assert_eq!(rejector.rejected(), vec![ProcessId(2)]);
        assert_eq!(rejector.reasons(), vec![RejectReason::NameTaken]);

        // The rejected process's LEAVE must not evict the real alice
        server.handle_request(ClientRequest::leave(ProcessId(2), "alice"));
        assert_eq!(names(&server), vec!["alice"]);
    }

    #[test]
    fn test_duplicate_name_replaces_dead_holder() {
        let (mut server, ns, rejector, _rx) = setup(2);
        join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        // alice crashed without LEAVE and restarts under a new pid
        rejector.kill(1);
        server.handle_request(ClientRequest::join(ProcessId(3), "alice"));

        assert!(rejector.rejected().is_empty());
        assert_eq!(names(&server), vec!["alice", "bob"]);
        assert_eq!(server.registry().find("alice").map(|m| m.pid), Some(ProcessId(3)));
    }

    #[test]
    fn test_dead_holder_of_other_name_is_kept() {
        let (mut server, ns, rejector, _rx) = setup(2);
        join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        rejector.kill(1);
        server.handle_request(ClientRequest::join(ProcessId(3), "carol"));

        // Only a JOIN for the same name frees a dead holder's slot
        assert_eq!(rejector.reasons(), vec![RejectReason::Full]);
        assert_eq!(names(&server), vec!["alice", "bob"]);
    }

    #[test]
    fn test_long_name_routes_under_wire_width() {
        let (mut server, ns, _, _rx) = setup(5);
        let long = "a".repeat(40);
        let short = truncated(&long, USER_NAME_LEN).to_string();
        let alice = join(&mut server, &ns, &short, 1);
        let bob = join(&mut server, &ns, "bob", 2);

        // Full names go on the wire; the server sees the truncated ones
        let over_wire = |request: ClientRequest| ClientRequest::decode(&request.encode()).unwrap();
        server.handle_request(over_wire(ClientRequest::broadcast(ProcessId(1), &long, "hi")));
        assert_eq!(drain(&bob), vec![ServerDelivery::new(&short, "hi")]);

        server.handle_request(over_wire(ClientRequest::private(ProcessId(2), "bob", &long, "back")));
        assert_eq!(drain(&alice), vec![ServerDelivery::new("bob", "back")]);
        assert_eq!(server.registry().len(), 2);
    }

    #[test]
    fn test_duplicate_names_coexist_with_pid_naming() {
        let (mut server, ns, rejector, _rx) = setup_with(5, MailboxNaming::ByNameAndPid);
        let first = client_mailbox(&ns, "alice", 1, MailboxNaming::ByNameAndPid);
        let second = client_mailbox(&ns, "alice", 2, MailboxNaming::ByNameAndPid);
        let bob = client_mailbox(&ns, "bob", 3, MailboxNaming::ByNameAndPid);
        for (pid, name) in [(1, "alice"), (2, "alice"), (3, "bob")] {
            server.handle_request(ClientRequest::join(ProcessId(pid), name));
        }
        assert_eq!(server.registry().len(), 3);
        assert!(rejector.rejected().is_empty());

        server.handle_request(ClientRequest::broadcast(ProcessId(3), "bob", "hey"));
        assert_eq!(drain(&first), vec![ServerDelivery::new("bob", "hey")]);
        assert_eq!(drain(&second), vec![ServerDelivery::new("bob", "hey")]);
        assert!(drain(&bob).is_empty());
    }

    #[test]
    fn test_server_identity_is_reserved() {
        let (mut server, _ns, rejector, _rx) = setup(5);
        server.handle_request(ClientRequest::join(ProcessId(9), SERVER));

        assert!(server.registry().is_empty());
        assert_eq!(rejector.rejected(), vec![ProcessId(9)]);
        assert_eq!(rejector.reasons(), vec![RejectReason::NameTaken]);
    }

    #[test]
    fn test_leave_removes_only_sender() {
        let (mut server, ns, _, _rx) = setup(5);
        join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);

        server.handle_request(ClientRequest::leave(ProcessId(1), "alice"));
        assert_eq!(names(&server), vec!["bob"]);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let (mut server, ns, _, _rx) = setup(5);
        join(&mut server, &ns, "alice", 1);

        server.handle_request(ClientRequest::leave(ProcessId(5), "nobody"));
        assert_eq!(names(&server), vec!["alice"]);
    }

    #[test]
    fn test_broadcast_reaches_everyone_else_once() {
        let (mut server, ns, _, _rx) = setup(5);
        let mailboxes: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, name)| join(&mut server, &ns, name, i as i32 + 1))
            .collect();

        server.handle_request(ClientRequest::broadcast(ProcessId(1), "a", "ping"));

        assert!(drain(&mailboxes[0]).is_empty());
        for mailbox in &mailboxes[1..] {
            assert_eq!(drain(mailbox), vec![ServerDelivery::new("a", "ping")]);
        }
    }

    #[test]
    fn test_broadcast_from_unregistered_ignored() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);

        server.handle_request(ClientRequest::broadcast(ProcessId(7), "mallory", "spam"));
        assert!(drain(&alice).is_empty());
    }

    #[test]
    fn test_broadcast_skips_and_clears_unreachable_recipient() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        let carol = join(&mut server, &ns, "carol", 3);

        // bob crashed without leaving
        ns.unlink(&MailboxName::for_client(PREFIX, "bob", ProcessId(2), MailboxNaming::ByName))
            .unwrap();

        server.handle_request(ClientRequest::broadcast(ProcessId(1), "alice", "hello"));

        assert!(drain(&alice).is_empty());
        assert_eq!(drain(&carol), vec![ServerDelivery::new("alice", "hello")]);
        assert_eq!(names(&server), vec!["alice", "carol"]);
    }

    #[test]
    fn test_broadcast_to_full_mailbox_keeps_slot() {
        let (mut server, ns, _, _rx) = setup(5);
        join(&mut server, &ns, "alice", 1);
        let bob = join(&mut server, &ns, "bob", 2);
        for _ in 0..10 {
            server.handle_request(ClientRequest::broadcast(ProcessId(1), "alice", "flood"));
        }

        server.handle_request(ClientRequest::broadcast(ProcessId(1), "alice", "one more"));
        assert_eq!(server.registry().len(), 2);
        assert_eq!(drain(&bob).len(), 10);
    }

    #[test]
    fn test_private_message_delivered() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        let bob = join(&mut server, &ns, "bob", 2);
        let carol = join(&mut server, &ns, "carol", 3);

        server.handle_request(ClientRequest::private(ProcessId(1), "alice", "bob", "secret"));

        assert_eq!(drain(&bob), vec![ServerDelivery::new("alice", "secret")]);
        assert!(drain(&alice).is_empty());
        assert!(drain(&carol).is_empty());
    }

    #[test]
    fn test_private_recipient_with_trailing_newline() {
        let (mut server, ns, _, _rx) = setup(5);
        join(&mut server, &ns, "alice", 1);
        let bob = join(&mut server, &ns, "bob", 2);

        server.handle_request(ClientRequest::private(ProcessId(1), "alice", "bob\n", "hi"));
        assert_eq!(drain(&bob), vec![ServerDelivery::new("alice", "hi")]);
    }

    #[test]
    fn test_private_to_unknown_notifies_sender_only() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        let bob = join(&mut server, &ns, "bob", 2);
        // A mailbox exists for "ghost" but ghost never joined
        let ghost = client_mailbox(&ns, "ghost", 4, MailboxNaming::ByName);

        server.handle_request(ClientRequest::private(ProcessId(1), "alice", "ghost", "boo"));

        assert!(drain(&ghost).is_empty());
        assert!(drain(&bob).is_empty());
        assert_eq!(
            drain(&alice),
            vec![ServerDelivery::new(SERVER, RECIPIENT_NOT_FOUND)]
        );
    }

    #[test]
    fn test_private_to_unreachable_clears_slot() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        ns.unlink(&MailboxName::for_client(PREFIX, "bob", ProcessId(2), MailboxNaming::ByName))
            .unwrap();

        server.handle_request(ClientRequest::private(ProcessId(1), "alice", "bob", "there?"));

        assert_eq!(names(&server), vec!["alice"]);
        assert_eq!(
            drain(&alice),
            vec![ServerDelivery::new(SERVER, RECIPIENT_NOT_FOUND)]
        );
    }

    #[test]
    fn test_private_with_unreachable_sender_does_not_panic() {
        let (mut server, _ns, _, _rx) = setup(5);
        server.handle_request(ClientRequest::private(ProcessId(1), "nobody", "ghost", "x"));
        assert!(server.registry().is_empty());
    }

    #[test]
    fn test_heartbeat_reaches_all_and_keeps_stale_slots() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        join(&mut server, &ns, "bob", 2);
        ns.unlink(&MailboxName::for_client(PREFIX, "bob", ProcessId(2), MailboxNaming::ByName))
            .unwrap();

        server.send_heartbeats();

        let received = drain(&alice);
        assert_eq!(received.len(), 1);
        assert!(received[0].is_heartbeat_from(SERVER));
        assert_eq!(server.registry().len(), 2);
    }

    #[test]
    fn test_two_user_scenario() {
        let (mut server, ns, _, _rx) = setup(5);
        let alice = join(&mut server, &ns, "alice", 1);
        assert_eq!(names(&server), vec!["alice"]);
        let bob = join(&mut server, &ns, "bob", 2);
        assert_eq!(names(&server), vec!["alice", "bob"]);

        server.handle_request(ClientRequest::broadcast(ProcessId(1), "alice", "hi"));
        assert_eq!(drain(&bob), vec![ServerDelivery::new("alice", "hi")]);
        assert!(drain(&alice).is_empty());

        server.handle_request(ClientRequest::leave(ProcessId(2), "bob"));
        assert_eq!(names(&server), vec!["alice"]);

        server.handle_request(ClientRequest::broadcast(ProcessId(1), "alice", "anyone?"));
        assert!(drain(&bob).is_empty());
        assert!(drain(&alice).is_empty());
    }

    #[test]
    fn test_dispatch_shutdown_breaks() {
        let (mut server, ns, _, _rx) = setup(5);
        assert!(server.dispatch(ServerEvent::Heartbeat).is_continue());
        assert!(server.dispatch(ServerEvent::Shutdown).is_break());

        server.shutdown().unwrap();
        assert!(!ns.exists(&MailboxName::new(SERVER)));
    }

    #[tokio::test]
    async fn test_run_routes_heartbeats_and_shuts_down() {
        let ns = MemoryNamespace::new();
        let config = ServerConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..config(5, MailboxNaming::ByName)
        };
        let (server, requests) = ChatServer::bind(config, ns.clone(), RecordingRejector::default()).unwrap();
        let (control_tx, control_rx) = mpsc::channel(4);
        let handle = tokio::spawn(server.run(requests, control_rx));

        let alice = client_mailbox(&ns, "alice", 1, MailboxNaming::ByName);
        let server_mailbox = ns.open(&MailboxName::new(SERVER)).unwrap();
        server_mailbox
            .send(&ClientRequest::join(ProcessId(1), "alice").encode())
            .unwrap();

        // Wait for at least one heartbeat
        let mut buf = vec![0u8; DELIVERY_SIZE];
        let alice_reader = alice.clone();
        let len = tokio::task::spawn_blocking(move || {
            alice_reader.receive(&mut buf, Duration::from_secs(5)).unwrap().map(|len| (len, buf))
        })
        .await
        .unwrap();
        let (len, buf) = len.unwrap();
        assert!(ServerDelivery::decode(&buf[..len]).unwrap().is_heartbeat_from(SERVER));

        control_tx.send(ControlSignal::Interrupt).await.unwrap();
        handle.await.unwrap().unwrap();
        assert!(!ns.exists(&MailboxName::new(SERVER)));
    }
}
