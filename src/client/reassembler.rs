use bytes::BytesMut;

use crate::{
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// Merges fragmented data frames back into whole messages.
pub(crate) struct Reassembler {
    /// Opcode of the frame that opened the current message.
    fragment: Option<OpCode>,
    accumulated: BytesMut,
    max_read_buffer: usize,
}

impl Reassembler {
    pub fn new(max_read_buffer: usize) -> Self {
        Self {
            fragment: None,
            accumulated: BytesMut::new(),
            max_read_buffer,
        }
    }

    /// Feeds one decoded frame.
    ///
    /// Returns control frames and complete messages. `None` means the frame was buffered
    /// as part of an unfinished message.
    pub fn push(&mut self, mut frame: Frame) -> Result<Option<Frame>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    return Ok(Some(frame));
                }

                self.fragment = Some(frame.opcode);
                self.extend(&frame)?;
                Ok(None)
            }
            OpCode::Continuation => {
                let opcode = self
                    .fragment
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;
                self.extend(&frame)?;

                if !frame.fin {
                    return Ok(None);
                }

                frame.opcode = opcode;
                frame.payload = self.accumulated.split().freeze();
                self.fragment = None;
                Ok(Some(frame))
            }
            // control frames may arrive between fragments and are never merged
            _ => Ok(Some(frame)),
        }
    }

    fn extend(&mut self, frame: &Frame) -> Result<()> {
        self.accumulated.extend_from_slice(&frame.payload);
        if self.accumulated.len() >= self.max_read_buffer {
            return Err(WebSocketError::FrameTooLarge);
        }
        Ok(())
    }
}
