use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    frame::{FragmentRole, Frame, OpCode, MAX_CONTROL_PAYLOAD},
    Result, WebSocketError,
};

use super::ConnectionState;

/// Work handed to the driver task, which owns the socket.
#[derive(Debug)]
pub(crate) enum Command {
    /// Frames written back to back, then acknowledged once flushed.
    Send {
        frames: Vec<Frame>,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Start the close handshake.
    Close {
        reason: String,
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Writes to a connection.
///
/// Every frame is queued to the connection's driver task, which is the only writer on the
/// socket. Frames of a single call are written contiguously, so clones of a `Sender` can be
/// used from many tasks without interleaving messages.
#[derive(Debug, Clone)]
pub struct Sender {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Sender {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { commands, state }
    }

    /// Sends a whole text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(vec![Frame::text(text.into())]).await
    }

    /// Sends one fragment of a text message, see [`Frame::fragment`].
    ///
    /// Fails with [`WebSocketError::InvalidFragmentOpCode`] for control opcodes.
    pub async fn send_text_fragment(
        &self,
        text: impl Into<String>,
        opcode: OpCode,
        role: FragmentRole,
    ) -> Result<()> {
        ensure_data_opcode(opcode)?;
        self.send(vec![Frame::fragment(opcode, role, text.into())])
            .await
    }

    /// Sends a text message split into one frame per part.
    pub async fn send_text_parts<I, S>(&self, parts: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = parts.into_iter().map(Into::into).map(Bytes::from);
        self.send(Frame::fragments(OpCode::Text, parts)).await
    }

    /// Sends a whole binary message.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(vec![Frame::binary(data)]).await
    }

    /// Sends one fragment of a binary message, see [`Frame::fragment`].
    ///
    /// Fails with [`WebSocketError::InvalidFragmentOpCode`] for control opcodes.
    pub async fn send_binary_fragment(
        &self,
        data: impl Into<Bytes>,
        opcode: OpCode,
        role: FragmentRole,
    ) -> Result<()> {
        ensure_data_opcode(opcode)?;
        self.send(vec![Frame::fragment(opcode, role, data)]).await
    }

    /// Sends a binary message split into one frame per part.
    pub async fn send_binary_parts<I, B>(&self, parts: I) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.send(Frame::fragments(OpCode::Binary, parts)).await
    }

    /// Sends a ping, empty when `message` is `None`.
    pub async fn send_ping(&self, message: Option<Bytes>) -> Result<()> {
        let payload = message.unwrap_or_default();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlPayloadTooLarge(payload.len()));
        }
        self.send(vec![Frame::ping(payload)]).await
    }

    /// Starts the close handshake with status 1001 and `reason`.
    ///
    /// Resolves once the close frame is written. The end of the handshake is reported on the
    /// event stream with `Disconnected`.
    pub async fn close(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        // two bytes of the control payload go to the status code
        if reason.len() > MAX_CONTROL_PAYLOAD - 2 {
            return Err(WebSocketError::ControlPayloadTooLarge(reason.len() + 2));
        }
        self.ensure_connected()?;

        let (ack, done) = oneshot::channel();
        self.dispatch(Command::Close { reason, ack }, done).await
    }

    /// Current state of the connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::WebsocketConnected
    }

    async fn send(&self, frames: Vec<Frame>) -> Result<()> {
        self.ensure_connected()?;
        if frames.is_empty() {
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        self.dispatch(Command::Send { frames, ack }, done).await
    }

    async fn dispatch(
        &self,
        command: Command,
        done: oneshot::Receiver<Result<()>>,
    ) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WebSocketError::NotConnected)?;
        // a dropped ack means the driver exited before writing
        done.await.unwrap_or(Err(WebSocketError::NotConnected))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(WebSocketError::NotConnected)
        }
    }
}

fn ensure_data_opcode(opcode: OpCode) -> Result<()> {
    if opcode.is_control() {
        Err(WebSocketError::InvalidFragmentOpCode(opcode))
    } else {
        Ok(())
    }
}
