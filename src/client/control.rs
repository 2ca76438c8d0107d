use bytes::Bytes;

use crate::{
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// What the driver owes the peer after a control frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Control {
    /// Reply to a ping.
    Pong(Frame),
    PongReceived,
    /// The peer closed; echo this frame back.
    Close(Frame),
}

pub(crate) struct ControlFrameHandler {
    exclude_zero_application_data_in_pong: bool,
}

impl ControlFrameHandler {
    pub fn new(exclude_zero_application_data_in_pong: bool) -> Self {
        Self {
            exclude_zero_application_data_in_pong,
        }
    }

    /// Returns `None` for data frames.
    pub fn handle(&self, frame: &Frame) -> Result<Option<Control>> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Control::Pong(self.pong(frame)))),
            OpCode::Pong => Ok(Some(Control::PongReceived)),
            OpCode::Close => on_close(frame).map(|echo| Some(Control::Close(echo))),
            _ => Ok(None),
        }
    }

    fn pong(&self, ping: &Frame) -> Frame {
        if ping.payload.is_empty() && !self.exclude_zero_application_data_in_pong {
            return Frame::pong(Bytes::from_static(&[0u8]));
        }
        Frame::pong(ping.payload.clone())
    }
}

fn on_close(frame: &Frame) -> Result<Frame> {
    match frame.payload.len() {
        0 => Ok(Frame::close_raw(Bytes::new())),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let code = frame
                .close_code()
                .ok_or(WebSocketError::InvalidCloseFrame)?;
            if !code.is_allowed() {
                return Err(WebSocketError::InvalidCloseCode);
            }
            if frame.close_reason().is_none() {
                return Err(WebSocketError::InvalidUTF8);
            }
            Ok(Frame::close(code, b""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::CloseCode;

    #[test]
    fn test_ping_gets_identical_pong() {
        let handler = ControlFrameHandler::new(true);
        let reply = handler.handle(&Frame::ping("ping-body")).unwrap();
        assert_eq!(reply, Some(Control::Pong(Frame::pong("ping-body"))));
    }

    #[test]
    fn test_empty_ping() {
        let handler = ControlFrameHandler::new(true);
        assert_eq!(
            handler.handle(&Frame::ping(Bytes::new())).unwrap(),
            Some(Control::Pong(Frame::pong(Bytes::new())))
        );

        let handler = ControlFrameHandler::new(false);
        assert_eq!(
            handler.handle(&Frame::ping(Bytes::new())).unwrap(),
            Some(Control::Pong(Frame::pong(vec![0u8])))
        );
    }

    #[test]
    fn test_pong_and_data() {
        let handler = ControlFrameHandler::new(true);
        assert_eq!(
            handler.handle(&Frame::pong("x")).unwrap(),
            Some(Control::PongReceived)
        );
        assert_eq!(handler.handle(&Frame::text("x")).unwrap(), None);
    }

    #[test]
    fn test_close_echo() {
        let handler = ControlFrameHandler::new(true);

        let echo = handler
            .handle(&Frame::close(CloseCode::Normal, "bye"))
            .unwrap();
        assert_eq!(echo, Some(Control::Close(Frame::close(CloseCode::Normal, b""))));

        let echo = handler.handle(&Frame::close_raw(Bytes::new())).unwrap();
        assert_eq!(echo, Some(Control::Close(Frame::close_raw(Bytes::new()))));
    }

    #[test]
    fn test_invalid_close() {
        let handler = ControlFrameHandler::new(true);

        assert!(matches!(
            handler.handle(&Frame::close_raw(vec![0x03])),
            Err(WebSocketError::InvalidCloseFrame)
        ));
        assert!(matches!(
            handler.handle(&Frame::close(CloseCode::Abnormal, "")),
            Err(WebSocketError::InvalidCloseCode)
        ));
        assert!(matches!(
            handler.handle(&Frame::close(CloseCode::Normal, [0xffu8, 0xfe])),
            Err(WebSocketError::InvalidUTF8)
        ));
    }
}
