mod builder;
mod control;
mod driver;
mod options;
mod reassembler;
mod sender;
mod status;

use std::{
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

use futures::Stream;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{stream::MaybeTlsStream, Result};

use driver::Driver;

pub use builder::WebSocketBuilder;
pub use options::Options;
pub use sender::Sender;
pub use status::{ConnectionState, ConnectionStatus, Event};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory
/// safety and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed size of a reassembled fragmented message, set to 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Commands a connection queues before senders wait for the driver.
const COMMAND_QUEUE: usize = 64;

/// A client WebSocket connection.
///
/// The connection itself runs in a background task. A `WebSocket` is the consuming end of
/// that task's [`Event`] stream, plus a [`Sender`] for writing.
///
/// The stream yields every state the connection enters, every received message and the
/// outcome of every send. It ends after `Disconnected`, or with an `Err` item after
/// `Aborted` or `ConnectionFailed`.
///
/// Dropping the `WebSocket` and every clone of its [`Sender`] closes the connection
/// gracefully.
///
/// # Buffering
///
/// The event queue is unbounded so the connection task never waits on the consumer.
/// Events pile up for as long as a `WebSocket` is held but not polled, one per received
/// message and one per completed send. Keep polling it, or drop it: once the `WebSocket`
/// is gone, events are discarded and the connection keeps running for its senders.
pub struct WebSocket {
    events: mpsc::UnboundedReceiver<Result<Event>>,
    sender: Sender,
    subprotocol: Arc<OnceLock<String>>,
}

impl WebSocket {
    /// Starts building a connection to `url`.
    ///
    /// `ws` and `http` URLs connect in plain TCP, `wss` and `https` over TLS.
    pub fn connect(url: Url) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }

    /// Runs a connection over a stream connected by the caller.
    ///
    /// The Upgrade request is built from `url`. No TLS is layered on top of `io`.
    ///
    /// # Example
    /// ```no_run
    /// use tokio::net::TcpStream;
    /// use wsclient::{Options, WebSocket};
    ///
    /// async fn run() -> wsclient::Result<()> {
    ///     let socket = TcpStream::connect("127.0.0.1:9001").await?;
    ///     let ws = WebSocket::handshake("ws://127.0.0.1:9001".parse()?, socket, Options::default()).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn handshake<S>(url: Url, io: S, options: Options) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        options.validate()?;

        let (ws, driver) = WebSocket::pair(url, options, None);
        tokio::spawn(driver.attach(MaybeTlsStream::Other(Box::new(io))));
        Ok(ws)
    }

    fn pair(url: Url, options: Options, cancel: Option<CancellationToken>) -> (WebSocket, Driver) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Initialized);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let subprotocol = Arc::new(OnceLock::new());

        let driver = Driver::new(
            url,
            options,
            events_tx,
            state_tx,
            commands,
            cancel.unwrap_or_default(),
            Arc::clone(&subprotocol),
        );
        let ws = WebSocket {
            events,
            sender: Sender::new(commands_tx, state),
            subprotocol,
        };
        (ws, driver)
    }

    /// Waits for the next event. `None` once the connection has ended.
    pub async fn next_event(&mut self) -> Option<Result<Event>> {
        self.events.recv().await
    }

    /// Returns a sender writing to this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Starts the close handshake, see [`Sender::close`].
    pub async fn close(&self, reason: impl Into<String>) -> Result<()> {
        self.sender.close(reason).await
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    /// The subprotocol selected by the server, once connected.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.get().map(String::as_str)
    }
}

impl Stream for WebSocket {
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
