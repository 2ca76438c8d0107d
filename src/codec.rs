//! Frame codec for [`tokio_util::codec::Framed`].
//!
//! The [`Decoder`] parses frames incrementally from the read buffer, one parsing stage at a
//! time, and unmasks payloads eagerly. The [`Encoder`] always masks, as clients must.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    mask::apply_mask,
    WebSocketError,
};

/// Decoding stage of the frame currently being read.
enum ReadState {
    /// The first two bytes have been consumed.
    Header(Header),
    /// Extended length and masking key have been consumed.
    Payload(HeaderAndMask),
}

/// Fields of the first two header bytes.
struct Header {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    masked: bool,
    opcode: OpCode,
    /// 7-bit length marker.
    length_code: u8,
    /// Bytes of extended length and masking key still to read.
    remaining: usize,
}

struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Combined frame decoder and encoder.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec rejecting incoming frames of `max_payload_size` bytes or more.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload_size),
            encoder: Encoder,
        }
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = Frame;
    type Error = WebSocketError;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WebSocketError> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WebSocketError> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = WebSocketError;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), WebSocketError> {
        self.encoder.encode(item, dst)
    }
}

/// Incremental frame decoder.
///
/// Frames carrying the MASK bit are accepted and unmasked here, the key is kept on the
/// returned [`Frame`]. Whether a masked frame is acceptable is up to the caller.
pub struct Decoder {
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes one frame, returning `Ok(None)` until the buffer holds all of it.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let first = src.get_u8();
                    let second = src.get_u8();

                    let fin = first & 0b1000_0000 != 0;
                    let rsv1 = first & 0b0100_0000 != 0;
                    let rsv2 = first & 0b0010_0000 != 0;
                    let rsv3 = first & 0b0001_0000 != 0;

                    // no extension is ever negotiated
                    if rsv1 || rsv2 || rsv3 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }

                    let opcode = OpCode::try_from(first & 0b0000_1111)?;
                    let masked = second & 0b1000_0000 != 0;
                    let length_code = second & 0x7F;

                    if opcode.is_control() {
                        if !fin {
                            return Err(WebSocketError::ControlFrameFragmented);
                        }
                        if usize::from(length_code) > MAX_CONTROL_PAYLOAD {
                            return Err(WebSocketError::ControlFrameTooLarge);
                        }
                    }

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        rsv1,
                        rsv2,
                        rsv3,
                        masked,
                        opcode,
                        length_code,
                        remaining: extra + masked as usize * 4,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.remaining {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.length_code {
                        126 => u64::from(src.get_u16()),
                        127 => src.get_u64(),
                        code => u64::from(code),
                    };

                    // the most significant bit of a 64-bit length must be 0
                    if payload_len > i64::MAX as u64 {
                        return Err(WebSocketError::FrameTooLarge);
                    }
                    let payload_len =
                        usize::try_from(payload_len).map_err(|_| WebSocketError::FrameTooLarge)?;
                    if payload_len >= self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        src.reserve(header_and_mask.payload_len - src.remaining());
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let mut payload = src.split_to(payload_len);
                    if let Some(mask) = mask {
                        apply_mask(&mut payload, mask);
                    }

                    let mut frame = Frame::new(header.fin, header.opcode, mask, payload.freeze());
                    frame.rsv1 = header.rsv1;
                    frame.rsv2 = header.rsv2;
                    frame.rsv3 = header.rsv3;

                    break Ok(Some(frame));
                }
            }
        }
    }

    /// A frame cut short by the end of the stream is dropped without an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if self.state.take().is_some() || !src.is_empty() {
                    #[cfg(feature = "logging")]
                    log::debug!("stream ended inside a frame, {} bytes dropped", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

/// Client frame encoder.
///
/// Every frame is masked. The key preset on the frame is used when there is one, otherwise
/// a fresh random key is drawn for each frame. The frame itself is not modified.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = frame.payload_length();
        if len > i64::MAX as u64 {
            return Err(WebSocketError::PayloadTooLarge(len));
        }

        let mask = frame.mask.unwrap_or_else(rand::random);

        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head, Some(mask));

        dst.reserve(size + frame.payload.len());
        dst.put_slice(&head[..size]);

        let start = dst.len();
        dst.put_slice(&frame.payload);
        apply_mask(&mut dst[start..], mask);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FragmentRole;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    const MAX: usize = 1 << 20;

    fn encode(frame: Frame) -> BytesMut {
        let mut dst = BytesMut::new();
        Encoder.encode(frame, &mut dst).unwrap();
        dst
    }

    fn server_frame(first: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(first);
        match payload.len() {
            len if len < 126 => buf.put_u8(len as u8),
            len if len < 65536 => {
                buf.put_u8(126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(127);
                buf.put_u64(len as u64);
            }
        }
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn test_text_round_trip_all_tiers() {
        for len in [0usize, 1, 10, 125, 300, 70000] {
            let text: String = "abcdefghijklmnopqrstuvwxyz"
                .chars()
                .cycle()
                .take(len)
                .collect();

            let mut buf = encode(Frame::text(text.clone()));
            let header_len = match len {
                l if l < 126 => 2,
                l if l < 65536 => 4,
                _ => 10,
            } + 4;
            assert_eq!(buf.len(), header_len + len, "len {len}");
            assert_eq!(buf[1] & 0x80, 0x80, "client frames are masked");

            let frame = Decoder::new(MAX).decode(&mut buf).unwrap().unwrap();
            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(frame.message(), Some(text.as_str()));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_extended_lengths_are_big_endian() {
        let buf = encode(Frame::binary(vec![7u8; 300]));
        assert_eq!(buf[1], 0x80 | 126);
        assert_eq!(&buf[2..4], &[0x01, 0x2C]);

        let buf = encode(Frame::binary(vec![7u8; 70000]));
        assert_eq!(buf[1], 0x80 | 127);
        assert_eq!(&buf[2..10], &[0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn test_preset_mask_is_used() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let frame = Frame::new(true, OpCode::Text, Some(key), "Hello");
        let buf = encode(frame);

        // RFC 6455 section 5.7 example
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_fresh_key_per_frame() {
        let keys: std::collections::HashSet<[u8; 4]> = (0..16)
            .map(|_| {
                let buf = encode(Frame::text("x"));
                [buf[2], buf[3], buf[4], buf[5]]
            })
            .collect();
        assert!(keys.len() > 1);
    }

    #[test]
    fn test_decode_unmasked_server_frame() {
        let mut buf = server_frame(0x81, b"Hello");
        let frame = Decoder::new(MAX).decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message(), Some("Hello"));
        assert!(!frame.is_masked());
    }

    #[test]
    fn test_decode_in_pieces() {
        let whole = encode(Frame::binary(vec![0xAB; 300]));
        let mut decoder = Decoder::new(MAX);
        let mut buf = BytesMut::new();

        for (i, byte) in whole.iter().enumerate() {
            buf.put_u8(*byte);
            let result = decoder.decode(&mut buf).unwrap();
            if i + 1 < whole.len() {
                assert!(result.is_none());
            } else {
                let frame = result.unwrap();
                assert_eq!(frame.payload.len(), 300);
                assert!(frame.payload.iter().all(|b| *b == 0xAB));
                assert!(frame.is_masked());
            }
        }
    }

    #[test]
    fn test_decode_fragment_roles() {
        let mut buf = encode(Frame::fragment(OpCode::Text, FragmentRole::First, "A"));
        let frame = Decoder::new(MAX).decode(&mut buf).unwrap().unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut buf = server_frame(0x81 | 0x40, b"x");
        assert!(matches!(
            Decoder::new(MAX).decode(&mut buf),
            Err(WebSocketError::ReservedBitsNotZero)
        ));
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        let mut buf = server_frame(0x83, b"x");
        assert!(matches!(
            Decoder::new(MAX).decode(&mut buf),
            Err(WebSocketError::InvalidOpCode(3))
        ));
    }

    #[test]
    fn test_control_frame_rules() {
        let mut buf = server_frame(0x09, b"");
        assert!(matches!(
            Decoder::new(MAX).decode(&mut buf),
            Err(WebSocketError::ControlFrameFragmented)
        ));

        let mut buf = server_frame(0x89, &[0u8; 126]);
        assert!(matches!(
            Decoder::new(MAX).decode(&mut buf),
            Err(WebSocketError::ControlFrameTooLarge)
        ));

        let mut buf = server_frame(0x89, &[0u8; 125]);
        let frame = Decoder::new(MAX).decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);
    }

    #[test]
    fn test_payload_limits() {
        let mut buf = server_frame(0x82, &[0u8; 64]);
        assert!(matches!(
            Decoder::new(64).decode(&mut buf),
            Err(WebSocketError::FrameTooLarge)
        ));

        let mut buf = BytesMut::new();
        buf.put_u8(0x82);
        buf.put_u8(127);
        buf.put_u64(1 << 63);
        assert!(matches!(
            Decoder::new(MAX).decode(&mut buf),
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_truncated_frame_at_eof() {
        let mut buf = server_frame(0x82, &[1u8; 10]);
        buf.truncate(6);

        let mut decoder = Decoder::new(MAX);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        let mut buf = BytesMut::from(&[0x81u8][..]);
        assert!(Decoder::new(MAX).decode_eof(&mut buf).unwrap().is_none());
    }
}
