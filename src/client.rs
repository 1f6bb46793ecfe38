//! Client session
//!
//! Owns one mailbox, registers with the server and relays chat traffic.
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED → (EXITING | REJECTED) → TERMINATED
//! ```
//!
//! Every path out of `CONNECTED` ends in `terminate`, which removes the
//! session's mailbox from the namespace once the session owns the name.
//!
//! A mailbox name that already existed at connect time is either left over
//! from a crashed run or held by a live process with the same username. Such
//! a mailbox is not read until the JOIN has had `join_grace` to be rejected,
//! and a rejected session leaves the name in place.

use std::io::Write;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, TransportError};
use crate::mailbox::{Claim, Mailbox, MailboxAttrs, Namespace, OwnedMailbox};
use crate::message::{truncated, ClientRequest, ServerDelivery, DELIVERY_SIZE, USER_NAME_LEN};
use crate::signals::{ControlSignal, LivenessTracker, RejectReason};
use crate::types::{MailboxName, ProcessId};
use crate::worker;

/// Buffer between the mailbox reader and the session loop
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Exiting,
    Rejected,
    Terminated,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The user asked to leave, or interrupted the client
    Exited,
    /// The server refused the JOIN
    Rejected,
    /// Heartbeats stopped arriving
    ServerNotFound,
    /// The server mailbox did not exist at startup
    ServerUnavailable,
    /// The session's own mailbox failed
    TransportFailed,
}

impl SessionOutcome {
    /// Process exit status for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            SessionOutcome::Exited => 0,
            SessionOutcome::ServerUnavailable | SessionOutcome::TransportFailed => 1,
            SessionOutcome::Rejected => 2,
            SessionOutcome::ServerNotFound => 3,
        }
    }
}

/// Commands accepted from the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Broadcast(String),
    Private { recipient: String, body: String },
    Exit,
}

/// A connected chat client
pub struct ClientSession<N: Namespace> {
    config: ClientConfig,
    user_name: String,
    pid: ProcessId,
    state: SessionState,
    server: N::Mailbox,
    /// Taken exactly once, by `terminate`
    mailbox: Option<OwnedMailbox<N>>,
    claim: Claim,
    /// Whether `terminate` removes the mailbox name
    owns_name: bool,
    /// Reader not started yet, see `join_deadline`
    pending_reader: Option<(N::Mailbox, mpsc::Sender<ServerDelivery>)>,
    join_deadline: Instant,
    deliveries: mpsc::Receiver<ServerDelivery>,
    liveness: LivenessTracker,
    output: Box<dyn Write + Send>,
}

impl<N: Namespace> ClientSession<N> {
    /// Create the session mailbox and send JOIN
    ///
    /// Usernames longer than the wire field are truncated first, so the
    /// mailbox name matches what the server derives. If the server mailbox
    /// does not exist the session mailbox is removed again and
    /// `AppError::ServerUnavailable` is returned. Rejection listeners must
    /// already be installed: the server may refuse the JOIN before this
    /// returns.
    pub async fn connect(
        config: ClientConfig,
        namespace: N,
        user_name: &str,
        pid: ProcessId,
        output: Box<dyn Write + Send>,
    ) -> Result<Self, AppError> {
        let user_name = truncated(user_name.trim_end_matches(['\n', '\r']), USER_NAME_LEN).to_string();
        debug!("{}: {:?} -> {:?}", user_name, SessionState::Disconnected, SessionState::Connecting);

        let own_name = MailboxName::for_client(&config.client_prefix, &user_name, pid, config.naming);
        let attrs = MailboxAttrs {
            max_messages: config.mailbox_depth,
            message_size: DELIVERY_SIZE,
        };
        let (owned, mailbox, claim) = OwnedMailbox::claim(namespace.clone(), own_name.clone(), attrs)?;
        if claim == Claim::Adopted {
            warn!("Mailbox {} already exists; it may belong to another {}", own_name, user_name);
        }

        let server_name = MailboxName::new(config.server_mailbox.clone());
        let server = match namespace.open(&server_name) {
            Ok(server) => server,
            Err(e) => {
                match claim {
                    Claim::Created => {
                        if let Err(release_err) = owned.release() {
                            warn!("Failed to remove {}: {}", own_name, release_err);
                        }
                    }
                    Claim::Adopted => owned.relinquish(),
                }
                return Err(match e {
                    TransportError::NotFound(_) => AppError::ServerUnavailable(server_name),
                    other => other.into(),
                });
            }
        };

        let (tx, deliveries) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut session = Self {
            liveness: LivenessTracker::new(config.liveness_timeout, Instant::now()),
            join_deadline: Instant::now() + config.join_grace,
            config,
            user_name,
            pid,
            state: SessionState::Connecting,
            server,
            mailbox: Some(owned),
            claim,
            owns_name: claim == Claim::Created,
            pending_reader: Some((mailbox, tx)),
            deliveries,
            output,
        };
        if claim == Claim::Created {
            if let Err(e) = session.start_reader() {
                session.terminate();
                return Err(e.into());
            }
        }

        info!("User {} connecting to server", session.user_name);
        let join = ClientRequest::join(pid, &session.user_name);
        if let Err(e) = session.send(&join).await {
            session.terminate();
            return Err(e.into());
        }
        session.set_state(SessionState::Connected);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Run until the user exits, the server rejects us, or the server dies
    ///
    /// `commands` closing counts as an exit.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<UserCommand>,
        mut control: mpsc::Receiver<ControlSignal>,
    ) -> SessionOutcome {
        let mut liveness_check = interval(self.config.liveness_check);
        liveness_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => self.handle_delivery(delivery),
                    None => {
                        error!("Mailbox reader for {} stopped", self.user_name);
                        break SessionOutcome::TransportFailed;
                    }
                },
                command = commands.recv() => match command {
                    Some(UserCommand::Exit) | None => {
                        self.set_state(SessionState::Exiting);
                        self.leave().await;
                        break SessionOutcome::Exited;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(signal) = control.recv() => match signal {
                    ControlSignal::Reject(reason) => {
                        self.set_state(SessionState::Rejected);
                        if self.claim == Claim::Adopted {
                            self.owns_name = false;
                        }
                        self.print(match reason {
                            RejectReason::Full => "Server is full.",
                            RejectReason::NameTaken => "Name is already taken.",
                        });
                        self.leave().await;
                        break SessionOutcome::Rejected;
                    }
                    ControlSignal::Interrupt => {
                        self.set_state(SessionState::Exiting);
                        self.leave().await;
                        break SessionOutcome::Exited;
                    }
                },
                _ = sleep_until(self.join_deadline), if self.pending_reader.is_some() => {
                    if let Err(e) = self.start_reader() {
                        error!("Cannot start mailbox reader for {}: {}", self.user_name, e);
                        break SessionOutcome::TransportFailed;
                    }
                }
                _ = liveness_check.tick() => {
                    if self.liveness.is_expired(Instant::now()) {
                        warn!(
                            "No heartbeat for {:?}, assuming the server is gone",
                            self.config.liveness_timeout
                        );
                        self.print("Server not found.");
                        break SessionOutcome::ServerNotFound;
                    }
                }
            }
        };

        self.terminate();
        outcome
    }

    /// Start draining the session mailbox, taking ownership of its name
    fn start_reader(&mut self) -> std::io::Result<()> {
        let Some((mailbox, tx)) = self.pending_reader.take() else {
            return Ok(());
        };
        let label = self
            .mailbox
            .as_ref()
            .map(|owned| owned.name().to_string())
            .unwrap_or_else(|| self.user_name.clone());
        worker::spawn_reader(label, mailbox, ServerDelivery::decode, tx, self.config.poll_interval)?;
        self.owns_name = true;
        Ok(())
    }

    fn handle_delivery(&mut self, delivery: ServerDelivery) {
        if delivery.is_heartbeat_from(&self.config.server_mailbox) {
            debug!("Heartbeat received");
            self.liveness.record(Instant::now());
            return;
        }
        self.print(&delivery.to_string());
    }

    async fn handle_command(&mut self, command: UserCommand) {
        let request = match command {
            UserCommand::Broadcast(body) => ClientRequest::broadcast(self.pid, &self.user_name, &body),
            UserCommand::Private { recipient, body } => {
                ClientRequest::private(self.pid, &self.user_name, &recipient, &body)
            }
            UserCommand::Exit => return,
        };
        if let Err(e) = self.send(&request).await {
            warn!("Message dropped: {}", e);
        }
    }

    /// Best-effort LEAVE
    async fn leave(&mut self) {
        if let Err(e) = self.send(&ClientRequest::leave(self.pid, &self.user_name)).await {
            warn!("Could not send LEAVE: {}", e);
        }
    }

    /// Send to the server, retrying while its mailbox is full
    async fn send(&mut self, request: &ClientRequest) -> Result<(), TransportError> {
        let frame = request.encode();
        let mut attempt = 1;
        loop {
            match self.server.send(&frame) {
                Err(TransportError::Full(name)) if attempt < self.config.send_attempts => {
                    debug!("{} full, retrying (attempt {})", name, attempt);
                    attempt += 1;
                    sleep(self.config.send_backoff).await;
                }
                result => return result,
            }
        }
    }

    /// Remove the session mailbox if we own its name; idempotent
    fn terminate(&mut self) {
        self.pending_reader = None;
        if let Some(mailbox) = self.mailbox.take() {
            if !self.owns_name {
                mailbox.relinquish();
            } else if let Err(e) = mailbox.release() {
                warn!("Failed to remove mailbox: {}", e);
            }
        }
        self.set_state(SessionState::Terminated);
        info!("Chat client {} exiting", self.user_name);
    }

    fn set_state(&mut self, next: SessionState) {
        debug!("{}: {:?} -> {:?}", self.user_name, self.state, next);
        self.state = next;
    }

    fn print(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{}", line).and_then(|_| self.output.flush()) {
            debug!("Failed to write output: {}", e);
        }
    }
}
