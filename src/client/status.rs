use crate::frame::Frame;

/// Lifecycle state of a connection.
///
/// Owned by the connection's driver task and published to every [`crate::Sender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    ConnectingToTcpSocket,
    TcpSocketConnected,
    ConnectingToSocketStream,
    SocketStreamConnected,
    SecureSocketStreamConnected,
    SendingHandshakeToWebsocketServer,
    HandshakeCompletedSuccessfully,
    WebsocketConnected,
    Disconnecting,
    Disconnected,
    Aborted,
    ConnectionFailed,
}

impl ConnectionState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::Aborted
                | ConnectionState::ConnectionFailed
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            // failures
            (Initialized | ConnectingToTcpSocket | TcpSocketConnected | ConnectingToSocketStream, ConnectionFailed) => true,
            (_, Aborted) => true,

            (Initialized, ConnectingToTcpSocket) => true,
            // a stream connected by the caller skips the socket phases
            (Initialized, SocketStreamConnected) => true,
            (ConnectingToTcpSocket, TcpSocketConnected) => true,
            (TcpSocketConnected, ConnectingToSocketStream) => true,
            (ConnectingToSocketStream, SocketStreamConnected | SecureSocketStreamConnected) => true,
            (SocketStreamConnected | SecureSocketStreamConnected, SendingHandshakeToWebsocketServer) => true,
            (SendingHandshakeToWebsocketServer, HandshakeCompletedSuccessfully) => true,
            (HandshakeCompletedSuccessfully, WebsocketConnected) => true,
            (WebsocketConnected, Disconnecting) => true,
            (Disconnecting, Disconnected) => true,
            _ => false,
        }
    }
}

/// Notification carried by an [`Event`].
///
/// Every [`ConnectionState`] is reported when entered. The remaining variants report
/// activity while the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Initialized,
    ConnectingToTcpSocket,
    TcpSocketConnected,
    ConnectingToSocketStream,
    SocketStreamConnected,
    SecureSocketStreamConnected,
    SendingHandshakeToWebsocketServer,
    HandshakeCompletedSuccessfully,
    WebsocketConnected,
    Disconnecting,
    Disconnected,
    Aborted,
    ConnectionFailed,
    /// The Upgrade exchange failed. Followed by `Aborted` and an error.
    HandshakeFailed,
    /// No Upgrade response arrived in time. Followed by `Aborted` and an error.
    HandshakeTimedOut,
    /// A complete text or binary message, carried in the event frame.
    DataframeReceived,
    PingReceived,
    PongReceived,
    PingSent,
    PongSent,
    /// The server started or answered the close handshake.
    CloseReceived,
    SendComplete,
    SendError,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Initialized => ConnectionStatus::Initialized,
            ConnectionState::ConnectingToTcpSocket => ConnectionStatus::ConnectingToTcpSocket,
            ConnectionState::TcpSocketConnected => ConnectionStatus::TcpSocketConnected,
            ConnectionState::ConnectingToSocketStream => ConnectionStatus::ConnectingToSocketStream,
            ConnectionState::SocketStreamConnected => ConnectionStatus::SocketStreamConnected,
            ConnectionState::SecureSocketStreamConnected => {
                ConnectionStatus::SecureSocketStreamConnected
            }
            ConnectionState::SendingHandshakeToWebsocketServer => {
                ConnectionStatus::SendingHandshakeToWebsocketServer
            }
            ConnectionState::HandshakeCompletedSuccessfully => {
                ConnectionStatus::HandshakeCompletedSuccessfully
            }
            ConnectionState::WebsocketConnected => ConnectionStatus::WebsocketConnected,
            ConnectionState::Disconnecting => ConnectionStatus::Disconnecting,
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Aborted => ConnectionStatus::Aborted,
            ConnectionState::ConnectionFailed => ConnectionStatus::ConnectionFailed,
        }
    }
}

/// One item of the [`crate::WebSocket`] stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub status: ConnectionStatus,
    /// The frame behind `DataframeReceived`, `PingReceived`, `PongReceived` and
    /// `CloseReceived`.
    pub frame: Option<Frame>,
}

impl Event {
    pub(crate) fn status(status: impl Into<ConnectionStatus>) -> Self {
        Self {
            status: status.into(),
            frame: None,
        }
    }

    pub(crate) fn frame(status: ConnectionStatus, frame: Frame) -> Self {
        Self {
            status,
            frame: Some(frame),
        }
    }
}
