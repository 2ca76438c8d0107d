//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! A [`Frame`] always stores its payload unmasked. The masking key is kept alongside so the
//! decoder can record what was on the wire and the encoder can reuse a preset key.
//!
//! ```rust
//! use wsclient::frame::{FragmentRole, Frame, OpCode};
//! use wsclient::close::CloseCode;
//!
//! let text = Frame::text("Hello, WebSocket!");
//! let close = Frame::close(CloseCode::Away, "bye");
//! let first = Frame::fragment(OpCode::Text, FragmentRole::First, "Hel");
//! assert!(!first.fin);
//! ```
use bytes::Bytes;

use crate::{close::CloseCode, WebSocketError};

/// WebSocket operation code, [RFC 6455 Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8).
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected at decode time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Position of an outbound frame inside a fragmented message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FragmentRole {
    /// Not a fragment boundary. A data opcode gives a complete message, a
    /// `Continuation` opcode gives a middle fragment.
    #[default]
    None,
    /// Opens a fragmented message, FIN is cleared.
    First,
    /// Closes a fragmented message. The opcode becomes `Continuation` and FIN is set.
    Last,
}

/// Largest frame header: 2 bytes, 8 bytes of extended length and a 4 byte key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[cfg(not(feature = "simd"))]
#[inline]
pub(crate) fn is_utf8(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

#[cfg(feature = "simd")]
#[inline]
pub(crate) fn is_utf8(bytes: &[u8]) -> bool {
    simdutf8::basic::from_utf8(bytes).is_ok()
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    /// Masking key seen on the wire, or preset for an outbound frame.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame with the reserved bits cleared.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a close frame carrying `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);

        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates a close frame without validating the payload.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates one frame of a possibly fragmented message.
    ///
    /// | role    | opcode         | FIN |
    /// |---------|----------------|-----|
    /// | `None`  | data opcode    | 1   |
    /// | `None`  | `Continuation` | 0   |
    /// | `First` | kept           | 0   |
    /// | `Last`  | `Continuation` | 1   |
    pub fn fragment(opcode: OpCode, role: FragmentRole, payload: impl Into<Bytes>) -> Self {
        let (fin, opcode) = match role {
            FragmentRole::None => (opcode != OpCode::Continuation, opcode),
            FragmentRole::First => (false, opcode),
            FragmentRole::Last => (true, OpCode::Continuation),
        };
        Self::new(fin, opcode, None, payload)
    }

    /// Splits a message into frames, one per part.
    ///
    /// A single part is sent unfragmented. Otherwise the first part opens the message,
    /// the middle parts are plain continuations and the last one closes it.
    pub fn fragments<I, P>(opcode: OpCode, parts: I) -> Vec<Frame>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let parts: Vec<Bytes> = parts.into_iter().map(Into::into).collect();
        let last = parts.len().saturating_sub(1);
        if last == 0 {
            return parts
                .into_iter()
                .map(|part| Frame::fragment(opcode, FragmentRole::None, part))
                .collect();
        }

        parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| match i {
                0 => Frame::fragment(opcode, FragmentRole::First, part),
                i if i == last => Frame::fragment(opcode, FragmentRole::Last, part),
                _ => Frame::fragment(OpCode::Continuation, FragmentRole::None, part),
            })
            .collect()
    }

    #[inline]
    pub fn payload_length(&self) -> u64 {
        self.payload.len() as u64
    }

    /// The payload as text, for text frames holding valid UTF-8.
    pub fn message(&self) -> Option<&str> {
        if self.opcode != OpCode::Text {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }

    /// The raw payload bytes, whatever the opcode.
    #[inline]
    pub fn as_binary(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    #[inline]
    pub fn is_utf8(&self) -> bool {
        is_utf8(&self.payload)
    }

    /// Status code of a close frame, if its payload has one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Reason text of a close frame, if it has a status code and valid UTF-8 after it.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Writes the header into `head` and returns its size.
    ///
    /// `mask` is written verbatim after the length field and the MASK bit is set.
    pub(crate) fn fmt_head(&self, head: &mut [u8; MAX_HEAD_SIZE], mask: Option<[u8; 4]>) -> usize {
        head[0] = (self.fin as u8) << 7
            | (self.rsv1 as u8) << 6
            | (self.rsv2 as u8) << 5
            | (self.rsv3 as u8) << 4
            | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        match mask {
            Some(mask) => {
                head[1] |= 0x80;
                head[size..size + 4].copy_from_slice(&mask);
                size + 4
            }
            None => size,
        }
    }
}
