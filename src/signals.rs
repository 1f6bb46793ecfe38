//! Liveness and control signaling
//!
//! Asynchronous OS signals are turned into `ControlSignal` values on a
//! channel, so event loops consume them like any other event and return
//! normally instead of unwinding out of a blocking call.
//!
//! JOIN rejection travels out-of-band: the server signals the joining
//! process directly (SIGUSR1 when full, SIGUSR2 when the name is taken)
//! rather than writing to its mailbox.

use std::io;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal as OsSignal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::ProcessId;

/// Control events delivered to an event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Interrupt, quit or terminate request
    Interrupt,
    /// The server refused our JOIN
    Reject(RejectReason),
}

/// Why a JOIN was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every slot is taken
    Full,
    /// The name is registered by a live process, or reserved
    NameTaken,
}

impl RejectReason {
    fn os_signal(self) -> OsSignal {
        match self {
            RejectReason::Full => OsSignal::SIGUSR1,
            RejectReason::NameTaken => OsSignal::SIGUSR2,
        }
    }
}

/// Start forwarding OS signals into `tx`
///
/// Handlers are registered before this returns, so a signal sent afterwards
/// is never lost. `with_reject` additionally listens for JOIN rejections.
pub fn forward_signals(
    tx: mpsc::Sender<ControlSignal>,
    with_reject: bool,
) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (mut full, mut name_taken) = if with_reject {
        (
            Some(signal(SignalKind::user_defined1())?),
            Some(signal(SignalKind::user_defined2())?),
        )
    } else {
        (None, None)
    };

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = interrupt.recv() => ControlSignal::Interrupt,
                _ = quit.recv() => ControlSignal::Interrupt,
                _ = terminate.recv() => ControlSignal::Interrupt,
                _ = recv_optional(&mut full) => ControlSignal::Reject(RejectReason::Full),
                _ = recv_optional(&mut name_taken) => ControlSignal::Reject(RejectReason::NameTaken),
            };
            debug!("Received {:?}", event);
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }))
}

async fn recv_optional(signal: &mut Option<Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

/// Out-of-band channel to client processes
///
/// Fire-and-forget: implementations must not wait for the requester.
pub trait Rejector: Send + 'static {
    /// Refuse a JOIN
    fn reject(&self, pid: ProcessId, reason: RejectReason);

    /// Whether the process still exists
    fn is_alive(&self, pid: ProcessId) -> bool;
}

/// Rejects by signalling the requesting process
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalRejector;

impl Rejector for SignalRejector {
    fn reject(&self, pid: ProcessId, reason: RejectReason) {
        if let Err(errno) = kill(Pid::from_raw(pid.0), reason.os_signal()) {
            warn!("Failed to signal rejection to process {}: {}", pid, errno);
        }
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        // EPERM still means the process exists
        !matches!(kill(Pid::from_raw(pid.0), None::<OsSignal>), Err(Errno::ESRCH))
    }
}

/// Client-side view of server liveness
#[derive(Debug, Clone, Copy)]
pub struct LivenessTracker {
    last_heartbeat: Instant,
    timeout: Duration,
}

impl LivenessTracker {
    /// Start tracking as if a heartbeat arrived at `now`
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            last_heartbeat: now,
            timeout,
        }
    }

    /// Record a heartbeat
    pub fn record(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// Check whether the gap since the last heartbeat exceeds the timeout
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_expiry() {
        let start = Instant::now();
        let tracker = LivenessTracker::new(Duration::from_secs(15), start);

        assert!(!tracker.is_expired(start));
        assert!(!tracker.is_expired(start + Duration::from_secs(15)));
        assert!(tracker.is_expired(start + Duration::from_secs(16)));
    }

    #[test]
    fn test_liveness_record_extends_deadline() {
        let start = Instant::now();
        let mut tracker = LivenessTracker::new(Duration::from_secs(15), start);

        tracker.record(start + Duration::from_secs(10));
        assert!(!tracker.is_expired(start + Duration::from_secs(20)));
        assert!(tracker.is_expired(start + Duration::from_secs(26)));
    }

    #[tokio::test]
    async fn test_rejection_reaches_own_process() {
        let (tx, mut rx) = mpsc::channel(4);
        let _forwarder = forward_signals(tx, true).unwrap();

        SignalRejector.reject(ProcessId::current(), RejectReason::Full);
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ControlSignal::Reject(RejectReason::Full)));

        SignalRejector.reject(ProcessId::current(), RejectReason::NameTaken);
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ControlSignal::Reject(RejectReason::NameTaken)));
    }

    #[test]
    fn test_is_alive() {
        assert!(SignalRejector.is_alive(ProcessId::current()));

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = ProcessId(child.id() as i32);
        child.wait().unwrap();
        // Reaped, so the pid no longer names a process
        assert!(!SignalRejector.is_alive(pid));
    }
}
