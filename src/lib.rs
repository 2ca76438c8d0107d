//! # wsclient
//! Client side implementation of the WebSocket protocol (RFC 6455).
//!
//! The crate opens a TCP (optionally TLS) connection, performs the HTTP Upgrade handshake
//! and then runs a single driver task per connection. That task owns the socket: it decodes
//! incoming frames, answers pings, reassembles fragmented messages and writes every outgoing
//! frame, so frames are never interleaved on the wire.
//!
//! The caller observes the connection through a [`WebSocket`], a [`futures::Stream`] of
//! [`Event`]s. Each event carries a [`ConnectionStatus`] and, for data and control frames,
//! the [`Frame`] itself. Writes go through a cloneable [`Sender`].
//!
//! # Features
//! - `logging` (default): debug logging of connection phases and protocol errors using the `log` crate.
//! - `simd`: SIMD accelerated UTF-8 validation of text frames through `simdutf8`.
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//!
//! use futures::StreamExt;
//! use wsclient::{ConnectionStatus, Options, WebSocket};
//!
//! async fn run() -> wsclient::Result<()> {
//!     let mut ws = WebSocket::connect("wss://echo.websocket.org".parse()?)
//!         .with_options(Options::default().with_client_ping(Duration::from_secs(30)))
//!         .await?;
//!
//!     let sender = ws.sender();
//!     while let Some(event) = ws.next().await {
//!         let event = event?;
//!         match event.status {
//!             ConnectionStatus::WebsocketConnected => sender.send_text("hello").await?,
//!             ConnectionStatus::DataframeReceived => {
//!                 if let Some(text) = event.frame.as_ref().and_then(|f| f.message()) {
//!                     println!("{text}");
//!                 }
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;

pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod stream;
pub mod tls;

use thiserror::Error;

pub use client::{
    ConnectionState, ConnectionStatus, Event, Options, Sender, WebSocket, WebSocketBuilder,
    MAX_PAYLOAD_READ, MAX_READ_BUFFER,
};
pub use close::CloseCode;
pub use frame::{FragmentRole, Frame, OpCode};
pub use tls::{TlsOptions, TlsVersion};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Broad classification of a [`WebSocketError`].
///
/// Transport, handshake and protocol errors are terminal for the connection. Send errors
/// are reported to the caller of the failing send and leave the connection running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid URL, options or TLS setup. Detected before any I/O.
    Configuration,
    /// TCP or TLS failure, or the stream ended without a close handshake.
    Transport,
    /// The HTTP Upgrade exchange failed.
    Handshake,
    /// The peer violated RFC 6455 framing rules.
    Protocol,
    /// An individual send could not be performed.
    Send,
}

/// Represents errors that can occur during WebSocket operations.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Only `ws`, `wss`, `http` and `https` URLs can be connected to.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// An [`Options`] value was rejected by [`Options::validate`].
    #[error("Invalid options: {0}")]
    InvalidOptions(&'static str),

    /// The TLS client configuration could not be built.
    #[error("TLS configuration: {0}")]
    TlsConfig(String),

    /// The URL host is not a valid TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// Wraps I/O errors raised by the socket.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The TCP connection was not established within the connect timeout.
    #[error("TCP connect timed out")]
    ConnectTimeout,

    /// TLS negotiation or certificate validation failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    /// The stream ended without a close handshake.
    #[error("Connection aborted unexpectedly")]
    ConnectionAborted,

    /// The connection's cancellation token fired.
    #[error("Connection cancelled")]
    Cancelled,

    /// The HTTP response to the Upgrade request was malformed or truncated.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server answered the Upgrade request with a status other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// No complete Upgrade response arrived within the handshake timeout.
    #[error("Handshake timed out")]
    HandshakeTimedOut,

    /// Writing the Upgrade request failed.
    #[error("Failed to send handshake: {0}")]
    HandshakeSendFailed(std::io::Error),

    /// The "Upgrade" response header is missing or is not "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" response header is missing or does not contain "upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// "Sec-WebSocket-Accept" does not match the key that was sent.
    #[error("Invalid Sec-WebSocket-Accept")]
    InvalidSecWebSocketAccept,

    /// The server selected none of the requested subprotocols, or a blank one.
    #[error("Subprotocol negotiation failed")]
    SubprotocolNegotiationFailed,

    /// A new data frame arrived while a fragmented message was still open.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived with no fragmented message open.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// RSV1, RSV2 or RSV3 was set without a negotiated extension.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame arrived with FIN cleared.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame carried more than 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// A frame or a reassembled message exceeded the configured limits.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The frame header carried one of the reserved opcodes.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Servers must never mask frames sent to a client.
    #[error("Received a masked frame from the server")]
    MaskedFrameFromServer,

    /// A text payload or close reason is not valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// A close frame had a one byte payload.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A close frame carried a status code that must not appear on the wire.
    #[error("Invalid close code")]
    InvalidCloseCode,

    /// The connection is not in the `WebsocketConnected` state.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// The payload does not fit the 63-bit length field.
    #[error("Payload too large ({0} bytes)")]
    PayloadTooLarge(u64),

    /// Ping payloads and close reasons must fit a 125 byte control frame.
    #[error("Control payload too large ({0} bytes)")]
    ControlPayloadTooLarge(usize),

    /// Fragments carry `Text`, `Binary` or `Continuation`. Control frames cannot be fragments.
    #[error("Invalid fragment opcode ({0:?})")]
    InvalidFragmentOpCode(OpCode),
}

impl WebSocketError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use WebSocketError::*;

        match self {
            InvalidHttpScheme | MissingHost | UrlParseError(_) | InvalidOptions(_)
            | TlsConfig(_) | InvalidDnsName(_) => ErrorKind::Configuration,
            IoError(_) | ConnectTimeout | TlsHandshake(_) | ConnectionAborted | Cancelled => {
                ErrorKind::Transport
            }
            HandshakeFailed(_)
            | InvalidStatusCode(_)
            | HandshakeTimedOut
            | HandshakeSendFailed(_)
            | InvalidUpgradeHeader
            | InvalidConnectionHeader
            | InvalidSecWebSocketAccept
            | SubprotocolNegotiationFailed => ErrorKind::Handshake,
            InvalidFragment
            | InvalidContinuationFrame
            | ReservedBitsNotZero
            | ControlFrameFragmented
            | ControlFrameTooLarge
            | FrameTooLarge
            | InvalidOpCode(_)
            | MaskedFrameFromServer
            | InvalidUTF8
            | InvalidCloseFrame
            | InvalidCloseCode => ErrorKind::Protocol,
            NotConnected
            | PayloadTooLarge(_)
            | ControlPayloadTooLarge(_)
            | InvalidFragmentOpCode(_) => ErrorKind::Send,
        }
    }

    /// Close code sent to the peer before aborting on a protocol error.
    pub(crate) fn close_code(&self) -> CloseCode {
        match self {
            WebSocketError::FrameTooLarge => CloseCode::Size,
            WebSocketError::InvalidOpCode(_) => CloseCode::Unsupported,
            WebSocketError::InvalidUTF8 => CloseCode::Invalid,
            _ => CloseCode::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            WebSocketError::InvalidHttpScheme.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(WebSocketError::ConnectTimeout.kind(), ErrorKind::Transport);
        assert_eq!(
            WebSocketError::InvalidStatusCode(200).kind(),
            ErrorKind::Handshake
        );
        assert_eq!(
            WebSocketError::InvalidContinuationFrame.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(WebSocketError::NotConnected.kind(), ErrorKind::Send);
        assert_eq!(
            WebSocketError::InvalidFragmentOpCode(OpCode::Ping).kind(),
            ErrorKind::Send
        );
    }

    #[test]
    fn test_protocol_close_codes() {
        assert_eq!(WebSocketError::FrameTooLarge.close_code(), CloseCode::Size);
        assert_eq!(
            WebSocketError::InvalidOpCode(3).close_code(),
            CloseCode::Unsupported
        );
        assert_eq!(WebSocketError::InvalidUTF8.close_code(), CloseCode::Invalid);
        assert_eq!(
            WebSocketError::InvalidFragment.close_code(),
            CloseCode::Protocol
        );
    }
}
