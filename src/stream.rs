//! The byte stream a connection runs over.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// Any bidirectional byte stream that can be handed to [`crate::WebSocket::handshake`].
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

/// A stream that might be protected with TLS.
#[pin_project(project = MaybeTlsStreamProj)]
pub enum MaybeTlsStream {
    /// Plain TCP, for `ws://` URLs.
    Plain(#[pin] TcpStream),
    /// TCP wrapped in rustls, for `wss://` URLs.
    Tls(#[pin] Box<TlsStream<TcpStream>>),
    /// A stream connected by the caller.
    Other(#[pin] Box<dyn AsyncIo>),
}

impl MaybeTlsStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }
}

impl std::fmt::Debug for MaybeTlsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaybeTlsStream::Plain(s) => f.debug_tuple("Plain").field(s).finish(),
            MaybeTlsStream::Tls(_) => f.write_str("Tls"),
            MaybeTlsStream::Other(_) => f.write_str("Other"),
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain(s) => s.poll_read(cx, buf),
            MaybeTlsStreamProj::Tls(s) => s.poll_read(cx, buf),
            MaybeTlsStreamProj::Other(s) => s.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeTlsStreamProj::Plain(s) => s.poll_write(cx, buf),
            MaybeTlsStreamProj::Tls(s) => s.poll_write(cx, buf),
            MaybeTlsStreamProj::Other(s) => s.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain(s) => s.poll_flush(cx),
            MaybeTlsStreamProj::Tls(s) => s.poll_flush(cx),
            MaybeTlsStreamProj::Other(s) => s.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain(s) => s.poll_shutdown(cx),
            MaybeTlsStreamProj::Tls(s) => s.poll_shutdown(cx),
            MaybeTlsStreamProj::Other(s) => s.poll_shutdown(cx),
        }
    }
}
