//! Mailbox reader worker
//!
//! Bridges a blocking mailbox into the async world: a dedicated thread loops
//! {wait for data, decode, forward} and hands every decoded frame to the
//! owning event loop through an mpsc channel. The thread ends when the
//! channel's receiver is dropped or the mailbox fails.

use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::CodecError;
use crate::mailbox::Mailbox;

/// Decoder for one frame kind
pub type Decode<T> = fn(&[u8]) -> Result<T, CodecError>;

/// Spawn a reader thread for `mailbox`
///
/// `poll` bounds how long a single wait blocks, which is also how quickly the
/// thread notices that nobody is listening anymore.
pub fn spawn_reader<M, T>(
    label: String,
    mailbox: M,
    decode: Decode<T>,
    tx: mpsc::Sender<T>,
    poll: Duration,
) -> std::io::Result<thread::JoinHandle<()>>
where
    M: Mailbox,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(format!("reader-{}", label))
        .spawn(move || read_loop(&label, mailbox, decode, tx, poll))
}

fn read_loop<M: Mailbox, T>(label: &str, mailbox: M, decode: Decode<T>, tx: mpsc::Sender<T>, poll: Duration) {
    let size = match mailbox.message_size() {
        Ok(size) => size,
        Err(e) => {
            error!("Cannot read attributes of {}: {}", label, e);
            return;
        }
    };
    let mut buf = vec![0u8; size];

    while !tx.is_closed() {
        match mailbox.receive(&mut buf, poll) {
            Ok(Some(len)) => match decode(&buf[..len]) {
                Ok(item) => {
                    if tx.blocking_send(item).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Dropping malformed frame on {}: {}", label, e);
                }
            },
            Ok(None) => {}
            Err(e) => {
                error!("Mailbox {} failed: {}", label, e);
                break;
            }
        }
    }

    debug!("Reader for {} ended", label);
}
