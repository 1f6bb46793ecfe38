//! POSIX message-queue namespace
//!
//! Mailboxes are kernel message queues (`mq_overview(7)`), so servers and
//! clients running as separate processes share one namespace. Names must
//! start with `/`.

use std::time::Duration;

use nix::errno::Errno;
use nix::mqueue::{
    mq_close, mq_getattr, mq_open, mq_send, mq_timedreceive, mq_unlink, MQ_OFlag, MqAttr, MqdT,
};
use nix::sys::stat::Mode;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use tracing::warn;

use crate::error::TransportError;
use crate::mailbox::{Mailbox, MailboxAttrs, Namespace};
use crate::types::MailboxName;

/// The system-wide POSIX message-queue namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixNamespace;

/// Open queue descriptor, closed on drop
pub struct PosixMailbox {
    name: MailboxName,
    mqd: Option<MqdT>,
}

impl PosixMailbox {
    fn descriptor(&self, op: &'static str) -> Result<&MqdT, TransportError> {
        self.mqd
            .as_ref()
            .ok_or_else(|| os_error(op, &self.name, Errno::EBADF))
    }
}

fn os_error(op: &'static str, name: &MailboxName, errno: Errno) -> TransportError {
    match errno {
        Errno::ENOENT => TransportError::NotFound(name.clone()),
        Errno::EAGAIN => TransportError::Full(name.clone()),
        Errno::EEXIST => TransportError::AlreadyExists(name.clone()),
        source => TransportError::Os {
            op,
            name: name.clone(),
            source,
        },
    }
}

impl Mailbox for PosixMailbox {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        match mq_send(self.descriptor("mq_send")?, payload, 0) {
            Ok(()) => Ok(()),
            Err(Errno::EMSGSIZE) => Err(TransportError::TooLarge {
                len: payload.len(),
                limit: self.message_size().unwrap_or(0),
            }),
            Err(errno) => Err(os_error("mq_send", &self.name, errno)),
        }
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, TransportError> {
        let now = clock_gettime(ClockId::CLOCK_REALTIME)
            .map_err(|errno| os_error("clock_gettime", &self.name, errno))?;
        let deadline = now + TimeSpec::from(timeout);
        let mut priority = 0u32;
        match mq_timedreceive(self.descriptor("mq_timedreceive")?, buf, &mut priority, &deadline) {
            Ok(len) => Ok(Some(len)),
            Err(Errno::ETIMEDOUT) | Err(Errno::EINTR) | Err(Errno::EAGAIN) => Ok(None),
            Err(errno) => Err(os_error("mq_timedreceive", &self.name, errno)),
        }
    }

    fn message_size(&self) -> Result<usize, TransportError> {
        let attr = mq_getattr(self.descriptor("mq_getattr")?)
            .map_err(|errno| os_error("mq_getattr", &self.name, errno))?;
        Ok(attr.msgsize() as usize)
    }
}

impl Drop for PosixMailbox {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            if let Err(errno) = mq_close(mqd) {
                warn!("mq_close on {} failed: {}", self.name, errno);
            }
        }
    }
}

fn create_queue(name: &MailboxName, attrs: MailboxAttrs, flags: MQ_OFlag) -> Result<PosixMailbox, TransportError> {
    let attr = MqAttr::new(0, attrs.max_messages as _, attrs.message_size as _, 0);
    let mqd = mq_open(name.as_str(), flags, Mode::S_IRUSR | Mode::S_IWUSR, Some(&attr))
        .map_err(|errno| os_error("mq_open", name, errno))?;
    Ok(PosixMailbox {
        name: name.clone(),
        mqd: Some(mqd),
    })
}

impl Namespace for PosixNamespace {
    type Mailbox = PosixMailbox;

    fn create(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<PosixMailbox, TransportError> {
        // O_CREAT without O_EXCL: a queue left behind by a crashed run is reused
        create_queue(name, attrs, MQ_OFlag::O_RDWR | MQ_OFlag::O_CREAT)
    }

    fn create_new(&self, name: &MailboxName, attrs: MailboxAttrs) -> Result<PosixMailbox, TransportError> {
        create_queue(name, attrs, MQ_OFlag::O_RDWR | MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL)
    }

    fn open(&self, name: &MailboxName) -> Result<PosixMailbox, TransportError> {
        let mqd = mq_open(
            name.as_str(),
            MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK,
            Mode::empty(),
            None,
        )
        .map_err(|errno| os_error("mq_open", name, errno))?;
        Ok(PosixMailbox {
            name: name.clone(),
            mqd: Some(mqd),
        })
    }

    fn unlink(&self, name: &MailboxName) -> Result<(), TransportError> {
        mq_unlink(name.as_str()).map_err(|errno| os_error("mq_unlink", name, errno))
    }
}
