//! Message protocol definitions
//!
//! Fixed-layout binary frames exchanged over mailboxes. Every field has a
//! fixed width, so every frame of a kind has the same size:
//!
//! ```text
//! ClientRequest  = <process_id i32><user_name [32]><control i32><delivery_mode i32>
//!                  <recipient_name [32]><body [256]>
//! ServerDelivery = <sender_name [32]><body [256]>
//! ```
//!
//! Integers are little-endian. Strings are NUL padded; over-long strings are
//! truncated so that a terminating NUL always fits.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::CodecError;
use crate::types::ProcessId;

/// Width of every username field, including the terminating NUL
pub const USER_NAME_LEN: usize = 32;

/// Width of every message body field, including the terminating NUL
pub const MESSAGE_LEN: usize = 256;

/// Encoded size of a `ClientRequest`
pub const REQUEST_SIZE: usize = 4 + USER_NAME_LEN + 4 + 4 + USER_NAME_LEN + MESSAGE_LEN;

/// Encoded size of a `ServerDelivery`
pub const DELIVERY_SIZE: usize = USER_NAME_LEN + MESSAGE_LEN;

/// Registry control carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Leave,
    Join,
    None,
}

impl Control {
    fn to_wire(self) -> i32 {
        match self {
            Control::Leave => 0,
            Control::Join => 1,
            Control::None => 2,
        }
    }
}

impl TryFrom<i32> for Control {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Control::Leave),
            1 => Ok(Control::Join),
            2 => Ok(Control::None),
            other => Err(CodecError::InvalidControl(other)),
        }
    }
}

/// Routing behavior requested for the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Private,
    Broadcast,
    /// Control-only, nothing to route
    None,
}

impl DeliveryMode {
    fn to_wire(self) -> i32 {
        match self {
            DeliveryMode::Private => 0,
            DeliveryMode::Broadcast => 1,
            DeliveryMode::None => 2,
        }
    }
}

impl TryFrom<i32> for DeliveryMode {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryMode::Private),
            1 => Ok(DeliveryMode::Broadcast),
            2 => Ok(DeliveryMode::None),
            other => Err(CodecError::InvalidDeliveryMode(other)),
        }
    }
}

/// Client → Server request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Sender's OS process, target of JOIN rejections
    pub process_id: ProcessId,
    pub user_name: String,
    pub control: Control,
    pub delivery_mode: DeliveryMode,
    /// Only meaningful for `DeliveryMode::Private`
    pub recipient_name: String,
    pub body: String,
}

impl ClientRequest {
    fn control_only(process_id: ProcessId, user_name: &str, control: Control) -> Self {
        Self {
            process_id,
            user_name: user_name.to_string(),
            control,
            delivery_mode: DeliveryMode::None,
            recipient_name: String::new(),
            body: String::new(),
        }
    }

    /// First contact with the server
    pub fn join(process_id: ProcessId, user_name: &str) -> Self {
        Self::control_only(process_id, user_name, Control::Join)
    }

    /// Deregistration notice
    pub fn leave(process_id: ProcessId, user_name: &str) -> Self {
        Self::control_only(process_id, user_name, Control::Leave)
    }

    /// Message for every other registered user
    pub fn broadcast(process_id: ProcessId, user_name: &str, body: &str) -> Self {
        Self {
            delivery_mode: DeliveryMode::Broadcast,
            body: body.to_string(),
            ..Self::control_only(process_id, user_name, Control::None)
        }
    }

    /// Message for a single recipient
    pub fn private(process_id: ProcessId, user_name: &str, recipient_name: &str, body: &str) -> Self {
        Self {
            delivery_mode: DeliveryMode::Private,
            recipient_name: recipient_name.to_string(),
            body: body.to_string(),
            ..Self::control_only(process_id, user_name, Control::None)
        }
    }

    /// Encode into a `REQUEST_SIZE` frame
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(REQUEST_SIZE);
        buf.put_i32_le(self.process_id.0);
        put_fixed(&mut buf, &self.user_name, USER_NAME_LEN);
        buf.put_i32_le(self.control.to_wire());
        buf.put_i32_le(self.delivery_mode.to_wire());
        put_fixed(&mut buf, &self.recipient_name, USER_NAME_LEN);
        put_fixed(&mut buf, &self.body, MESSAGE_LEN);
        buf
    }

    /// Decode a `REQUEST_SIZE` frame
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        if frame.len() != REQUEST_SIZE {
            return Err(CodecError::WrongSize {
                expected: REQUEST_SIZE,
                actual: frame.len(),
            });
        }
        let mut buf = frame;
        let process_id = ProcessId(buf.get_i32_le());
        let user_name = get_fixed(&mut buf, USER_NAME_LEN);
        let control = Control::try_from(buf.get_i32_le())?;
        let delivery_mode = DeliveryMode::try_from(buf.get_i32_le())?;
        let recipient_name = get_fixed(&mut buf, USER_NAME_LEN);
        let body = get_fixed(&mut buf, MESSAGE_LEN);
        Ok(Self {
            process_id,
            user_name,
            control,
            delivery_mode,
            recipient_name,
            body,
        })
    }
}

/// Server → Client delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDelivery {
    /// Originating username, or the server identity for heartbeats and notices
    pub sender_name: String,
    /// Empty for a heartbeat
    pub body: String,
}

impl ServerDelivery {
    pub fn new(sender_name: &str, body: &str) -> Self {
        Self {
            sender_name: sender_name.to_string(),
            body: body.to_string(),
        }
    }

    /// Empty liveness delivery from the server
    pub fn heartbeat(server_identity: &str) -> Self {
        Self::new(server_identity, "")
    }

    /// Check whether this is a heartbeat from the given server
    pub fn is_heartbeat_from(&self, server_identity: &str) -> bool {
        self.body.is_empty() && self.sender_name == truncated(server_identity, USER_NAME_LEN)
    }

    /// Encode into a `DELIVERY_SIZE` frame
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(DELIVERY_SIZE);
        put_fixed(&mut buf, &self.sender_name, USER_NAME_LEN);
        put_fixed(&mut buf, &self.body, MESSAGE_LEN);
        buf
    }

    /// Decode a `DELIVERY_SIZE` frame
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        if frame.len() != DELIVERY_SIZE {
            return Err(CodecError::WrongSize {
                expected: DELIVERY_SIZE,
                actual: frame.len(),
            });
        }
        let mut buf = frame;
        let sender_name = get_fixed(&mut buf, USER_NAME_LEN);
        let body = get_fixed(&mut buf, MESSAGE_LEN);
        Ok(Self { sender_name, body })
    }
}

impl std::fmt::Display for ServerDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.sender_name, self.body)
    }
}

/// Longest prefix of `s` that fits a `width`-byte field with its NUL
///
/// Cuts on a character boundary.
pub fn truncated(s: &str, width: usize) -> &str {
    let max = width - 1;
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_fixed(buf: &mut BytesMut, s: &str, width: usize) {
    let bytes = truncated(s, width).as_bytes();
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
}

fn get_fixed(buf: &mut &[u8], width: usize) -> String {
    let field = &buf[..width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    let value = String::from_utf8_lossy(&field[..end]).into_owned();
    buf.advance(width);
    value
}
