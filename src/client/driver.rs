use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_rustls::TlsConnector;
use tokio_util::{
    codec::{Framed, FramedParts},
    sync::CancellationToken,
};
use url::Url;

use crate::{
    close::CloseCode,
    codec::Codec,
    frame::{Frame, OpCode},
    handshake,
    stream::MaybeTlsStream,
    tls, ErrorKind, Result, WebSocketError,
};

use super::{
    control::{Control, ControlFrameHandler},
    reassembler::Reassembler,
    sender::Command,
    ConnectionState, ConnectionStatus, Event, Options,
};

type Transport = Framed<MaybeTlsStream, Codec>;

/// Where the TCP connection goes and how it is secured.
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    /// Overrides the address resolved from `host`.
    pub tcp_address: Option<SocketAddr>,
    /// Set for `wss://` URLs.
    pub connector: Option<TlsConnector>,
}

/// What the read path asks the loop to do next.
enum Flow {
    Continue,
    /// The peer closed; echo this frame and stop.
    Closed(Frame),
}

/// The task owning a connection.
///
/// Walks the connection through its states, then multiplexes reads, queued sends and
/// keep-alive pings over the single socket until the connection ends.
pub(crate) struct Driver {
    url: Url,
    options: Options,
    events: mpsc::UnboundedSender<Result<Event>>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    subprotocol: Arc<OnceLock<String>>,
}

impl Driver {
    pub fn new(
        url: Url,
        options: Options,
        events: mpsc::UnboundedSender<Result<Event>>,
        state: watch::Sender<ConnectionState>,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        subprotocol: Arc<OnceLock<String>>,
    ) -> Self {
        Self {
            url,
            options,
            events,
            state,
            commands,
            cancel,
            subprotocol,
        }
    }

    /// Opens the socket to `target` and runs the connection over it.
    pub async fn connect(self, target: Target) {
        self.emit(Event::status(ConnectionState::Initialized));
        self.transition(ConnectionState::ConnectingToTcpSocket);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WebSocketError::Cancelled),
            opened = self.open(target) => opened,
        };

        match opened {
            Ok(stream) => self.establish(stream).await,
            Err(WebSocketError::Cancelled) => {
                self.fail(ConnectionState::Aborted, WebSocketError::Cancelled)
            }
            Err(err) => self.fail(ConnectionState::ConnectionFailed, err),
        }
    }

    /// Runs the connection over a stream connected by the caller.
    pub async fn attach(self, stream: MaybeTlsStream) {
        self.emit(Event::status(ConnectionState::Initialized));
        self.transition(ConnectionState::SocketStreamConnected);
        self.establish(stream).await
    }

    async fn open(&self, target: Target) -> Result<MaybeTlsStream> {
        let Target {
            host,
            port,
            tcp_address,
            connector,
        } = target;

        let connect = async {
            match tcp_address {
                Some(address) => TcpStream::connect(address).await,
                None => {
                    let host = host.trim_start_matches('[').trim_end_matches(']');
                    TcpStream::connect((host, port)).await
                }
            }
        };
        let tcp = time::timeout(self.options.connect_timeout, connect)
            .await
            .map_err(|_| WebSocketError::ConnectTimeout)??;
        if let Err(_err) = tcp.set_nodelay(true) {
            #[cfg(feature = "logging")]
            log::warn!("set_nodelay failed on {}: {}", self.url, _err);
        }

        self.transition(ConnectionState::TcpSocketConnected);
        self.transition(ConnectionState::ConnectingToSocketStream);

        let stream = match connector {
            Some(connector) => {
                let domain = tls::server_name(&host)?;
                let stream = connector
                    .connect(domain, tcp)
                    .await
                    .map_err(WebSocketError::TlsHandshake)?;
                MaybeTlsStream::Tls(Box::new(stream))
            }
            None => MaybeTlsStream::Plain(tcp),
        };

        self.transition(if stream.is_secure() {
            ConnectionState::SecureSocketStreamConnected
        } else {
            ConnectionState::SocketStreamConnected
        });
        Ok(stream)
    }

    async fn establish(self, mut stream: MaybeTlsStream) {
        self.transition(ConnectionState::SendingHandshakeToWebsocketServer);

        let upgraded = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WebSocketError::Cancelled),
            upgraded = self.upgrade(&mut stream) => upgraded,
        };

        let leftover = match upgraded {
            Ok((subprotocol, leftover)) => {
                if let Some(subprotocol) = subprotocol {
                    let _ = self.subprotocol.set(subprotocol);
                }
                leftover
            }
            Err(err) => {
                match err {
                    WebSocketError::HandshakeTimedOut => {
                        self.emit(Event::status(ConnectionStatus::HandshakeTimedOut))
                    }
                    _ if err.kind() == ErrorKind::Handshake => {
                        self.emit(Event::status(ConnectionStatus::HandshakeFailed))
                    }
                    _ => {}
                }
                let _ = stream.shutdown().await;
                return self.fail(ConnectionState::Aborted, err);
            }
        };

        self.transition(ConnectionState::HandshakeCompletedSuccessfully);

        let codec = Codec::new(self.options.payload_limit());
        let mut parts = FramedParts::new::<Frame>(stream, codec);
        // frames the server sent right after its response head
        parts.read_buf = leftover;
        let framed = Framed::from_parts(parts);

        self.transition(ConnectionState::WebsocketConnected);
        self.run(framed).await
    }

    async fn upgrade(&self, stream: &mut MaybeTlsStream) -> Result<(Option<String>, BytesMut)> {
        let handshake = handshake::compose(
            &self.url,
            self.options.origin.as_deref(),
            &self.options.headers,
            &self.options.subprotocols,
        )?;
        let (response, leftover) =
            handshake::perform(stream, &handshake, self.options.handshake_timeout).await?;
        let subprotocol = handshake::verify(&response, &handshake)?;

        #[cfg(feature = "logging")]
        log::debug!("connected to {} (subprotocol={:?})", self.url, subprotocol);

        Ok((subprotocol, leftover))
    }

    async fn run(mut self, mut framed: Transport) {
        let mut reassembler = Reassembler::new(self.options.read_buffer_limit());
        let control = ControlFrameHandler::new(self.options.exclude_zero_application_data_in_pong);
        let mut ping = self.options.client_ping.then(|| {
            let period = self.options.client_ping_interval;
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = framed.get_mut().shutdown().await;
                    return self.fail(ConnectionState::Aborted, WebSocketError::Cancelled);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send { frames, ack }) => {
                        let result = self.send(&mut framed, frames).await;
                        let _ = ack.send(result);
                    }
                    Some(Command::Close { reason, ack }) => {
                        return self.close(framed, reason, Some(ack)).await;
                    }
                    // every sender is gone
                    None => return self.close(framed, String::new(), None).await,
                },
                _ = tick(ping.as_mut()) => {
                    let payload = self.options.client_ping_message.clone().unwrap_or_default();
                    let _ = self.send(&mut framed, vec![Frame::ping(payload)]).await;
                }
                frame = framed.next() => {
                    let flow = match frame {
                        Some(Ok(frame)) => {
                            self.on_frame(&mut framed, &mut reassembler, &control, frame).await
                        }
                        Some(Err(err)) => Err(err),
                        None => Err(WebSocketError::ConnectionAborted),
                    };

                    match flow {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Closed(echo)) => return self.on_peer_close(framed, echo).await,
                        Err(err) => return self.abort(framed, err).await,
                    }
                }
            }
        }
    }

    async fn on_frame(
        &self,
        framed: &mut Transport,
        reassembler: &mut Reassembler,
        control: &ControlFrameHandler,
        frame: Frame,
    ) -> Result<Flow> {
        if frame.is_masked() {
            return Err(WebSocketError::MaskedFrameFromServer);
        }

        let Some(frame) = reassembler.push(frame)? else {
            return Ok(Flow::Continue);
        };

        match control.handle(&frame)? {
            Some(Control::Pong(pong)) => {
                self.emit(Event::frame(ConnectionStatus::PingReceived, frame));
                self.send_pong(framed, pong).await;
            }
            Some(Control::PongReceived) => {
                self.emit(Event::frame(ConnectionStatus::PongReceived, frame));
            }
            Some(Control::Close(echo)) => {
                self.emit(Event::frame(ConnectionStatus::CloseReceived, frame));
                return Ok(Flow::Closed(echo));
            }
            None => {
                if self.options.check_utf8 && frame.opcode == OpCode::Text && !frame.is_utf8() {
                    return Err(WebSocketError::InvalidUTF8);
                }
                self.emit(Event::frame(ConnectionStatus::DataframeReceived, frame));
            }
        }

        Ok(Flow::Continue)
    }

    async fn send_pong(&self, framed: &mut Transport, pong: Frame) {
        match write(framed, vec![pong]).await {
            Ok(()) => self.emit(Event::status(ConnectionStatus::PongSent)),
            Err(_err) => {
                #[cfg(feature = "logging")]
                log::warn!("failed to send pong: {_err}");
                self.emit(Event::status(ConnectionStatus::SendError));
            }
        }
    }

    /// Writes frames queued by a [`super::Sender`] or the ping interval.
    async fn send(&self, framed: &mut Transport, frames: Vec<Frame>) -> Result<()> {
        let is_ping = frames.first().is_some_and(|f| f.opcode == OpCode::Ping);

        let result = write(framed, frames).await;
        match &result {
            Ok(()) if is_ping => self.emit(Event::status(ConnectionStatus::PingSent)),
            Ok(()) => self.emit(Event::status(ConnectionStatus::SendComplete)),
            Err(_err) => {
                #[cfg(feature = "logging")]
                log::warn!("send failed: {_err}");
                self.emit(Event::status(ConnectionStatus::SendError));
            }
        }
        result
    }

    /// Client side close: send 1001, wait for the server's close, shut down.
    async fn close(
        self,
        mut framed: Transport,
        reason: String,
        ack: Option<oneshot::Sender<Result<()>>>,
    ) {
        self.transition(ConnectionState::Disconnecting);

        let sent = write(&mut framed, vec![Frame::close(CloseCode::Away, reason)]).await;
        let delivered = sent.is_ok();
        if let Err(_err) = &sent {
            #[cfg(feature = "logging")]
            log::warn!("failed to send close frame: {_err}");
            self.emit(Event::status(ConnectionStatus::SendError));
        }
        if let Some(ack) = ack {
            let _ = ack.send(sent);
        }

        if delivered {
            // data still in flight from the server is dropped
            let wait = async {
                while let Some(Ok(frame)) = framed.next().await {
                    if frame.opcode == OpCode::Close {
                        self.emit(Event::frame(ConnectionStatus::CloseReceived, frame));
                        break;
                    }
                }
            };
            if time::timeout(self.options.close_timeout, wait).await.is_err() {
                #[cfg(feature = "logging")]
                log::debug!("no close frame from {} within the close timeout", self.url);
            }
        }

        let _ = framed.get_mut().shutdown().await;
        self.transition(ConnectionState::Disconnected);
    }

    async fn on_peer_close(self, mut framed: Transport, echo: Frame) {
        self.transition(ConnectionState::Disconnecting);

        if let Err(_err) = write(&mut framed, vec![echo]).await {
            #[cfg(feature = "logging")]
            log::debug!("failed to echo close frame: {_err}");
        }

        let _ = framed.get_mut().shutdown().await;
        self.transition(ConnectionState::Disconnected);
    }

    async fn abort(self, mut framed: Transport, err: WebSocketError) {
        if err.kind() == ErrorKind::Protocol {
            #[cfg(feature = "logging")]
            log::error!("protocol error from {}: {err}", self.url);

            let close = Frame::close(err.close_code(), err.to_string());
            let _ = write(&mut framed, vec![close]).await;
            let _ = framed.get_mut().shutdown().await;
        }

        self.fail(ConnectionState::Aborted, err);
    }

    fn emit(&self, event: Event) {
        // the caller may have dropped the event stream and kept a sender
        if self.events.is_closed() {
            return;
        }
        let _ = self.events.send(Ok(event));
    }

    /// Publishes `state` to the senders, then reports it on the event stream.
    fn transition(&self, state: ConnectionState) {
        let _previous = self.state.send_replace(state);
        debug_assert!(
            _previous.can_transition_to(state),
            "invalid transition {_previous:?} -> {state:?}"
        );

        #[cfg(feature = "logging")]
        log::debug!("{}: {_previous:?} -> {state:?}", self.url);

        self.emit(Event::status(state));
    }

    /// Ends the event stream with `err`.
    fn fail(&self, state: ConnectionState, err: WebSocketError) {
        #[cfg(feature = "logging")]
        log::debug!("{}: {err}", self.url);

        self.transition(state);
        let _ = self.events.send(Err(err));
    }
}

/// Writes `frames` back to back and flushes once.
async fn write(framed: &mut Transport, frames: Vec<Frame>) -> Result<()> {
    for frame in frames {
        framed.feed(frame).await?;
    }
    framed.flush().await
}

/// Resolves on the next tick, or never without an interval.
async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
