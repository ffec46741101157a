use crate::error::{HttpError, HttpResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Largest allowed control frame payload (RFC 6455 §5.5).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_bits(bits: u8) -> Option<OpCode> {
        match bits {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xa,
        }
    }

    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single WebSocket frame. The payload is always stored unmasked; the
/// masking key is retained so the runtime can tell whether the peer masked
/// the frame, and applied again on encode when present.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl WsFrame {
    pub fn text<T: Into<String>>(text: T) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: OpCode::Text,
            mask: None,
            payload: text.into().into_bytes(),
        }
    }

    pub fn binary(payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: OpCode::Binary,
            mask: None,
            payload,
        }
    }

    pub fn ping(payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: OpCode::Ping,
            mask: None,
            payload,
        }
    }

    pub fn pong(payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: OpCode::Pong,
            mask: None,
            payload,
        }
    }

    /// Close frame with a status code and UTF-8 reason.
    pub fn close(code: u16, reason: &str) -> WsFrame {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload
            .write_u16::<BigEndian>(code)
            .expect("Writing to a vector cannot fail");
        payload.extend_from_slice(reason.as_bytes());

        WsFrame {
            fin: true,
            opcode: OpCode::Close,
            mask: None,
            payload,
        }
    }

    /// Close frame echoing a raw payload (possibly empty).
    pub fn close_raw(payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: OpCode::Close,
            mask: None,
            payload,
        }
    }

    pub fn continuation(fin: bool, payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin,
            opcode: OpCode::Continuation,
            mask: None,
            payload,
        }
    }

    /// Mark the frame masked with the given key; used by client-role code
    /// and tests.
    pub fn masked(mut self, key: [u8; 4]) -> WsFrame {
        self.mask = Some(key);
        self
    }
}

/// XOR the payload against the cyclic 4-byte key. Involutory: applying it
/// twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (at, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[at % 4];
    }
}

/// Parse the close payload into its optional status code and reason. An
/// invalid UTF-8 reason is decoded lossily rather than failing the close.
pub fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }

    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();

    (Some(code), reason)
}

/// Decode one frame off the reader, unmasking the payload when masked.
pub fn read_frame<R: Read>(reader: &mut R, max_payload: usize) -> HttpResult<WsFrame> {
    let byte0 = reader.read_u8()?;
    let byte1 = reader.read_u8()?;

    let fin = byte0 & 0x80 != 0;
    if byte0 & 0x70 != 0 {
        return Err(HttpError::WebSocketProtocol("reserved bits set".into()));
    }

    let opcode = OpCode::from_bits(byte0 & 0x0f)
        .ok_or_else(|| HttpError::WebSocketProtocol("unknown opcode".into()))?;

    let masked = byte1 & 0x80 != 0;
    let length7 = byte1 & 0x7f;

    let length = match length7 {
        126 => reader.read_u16::<BigEndian>()? as usize,
        127 => {
            let length = reader.read_u64::<BigEndian>()?;
            if length > i64::max_value() as u64 {
                return Err(HttpError::WebSocketProtocol("length high bit set".into()));
            }
            length as usize
        }
        length7 => length7 as usize,
    };

    if opcode.is_control() {
        if !fin {
            return Err(HttpError::WebSocketProtocol("fragmented control frame".into()));
        }
        if length > MAX_CONTROL_PAYLOAD {
            return Err(HttpError::WebSocketProtocol("oversized control frame".into()));
        }
    }

    if length > max_payload {
        return Err(HttpError::PayloadTooLarge);
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(WsFrame {
        fin,
        opcode,
        mask,
        payload,
    })
}

/// Encode one frame onto the writer. Frames with a masking key are emitted
/// masked (client role); server frames carry no key and go out unmasked.
pub fn write_frame<W: Write>(writer: &mut W, frame: &WsFrame) -> HttpResult<()> {
    let byte0 = if frame.fin { 0x80 } else { 0x00 } | frame.opcode.bits();
    writer.write_u8(byte0)?;

    let mask_bit = if frame.mask.is_some() { 0x80 } else { 0x00 };
    let length = frame.payload.len();

    if length <= 125 {
        writer.write_u8(mask_bit | length as u8)?;
    } else if length <= u16::max_value() as usize {
        writer.write_u8(mask_bit | 126)?;
        writer.write_u16::<BigEndian>(length as u16)?;
    } else {
        writer.write_u8(mask_bit | 127)?;
        writer.write_u64::<BigEndian>(length as u64)?;
    }

    match frame.mask {
        Some(key) => {
            writer.write_all(&key)?;
            let mut masked = frame.payload.clone();
            apply_mask(&mut masked, key);
            writer.write_all(&masked)?;
        }
        None => writer.write_all(&frame.payload)?,
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(frame: WsFrame) -> WsFrame {
        let mut wire = Vec::new();
        write_frame(&mut wire, &frame).unwrap();
        read_frame(&mut Cursor::new(wire), 64 * 1024 * 1024).unwrap()
    }

    #[test]
    fn test_unmasked_text_roundtrip() {
        let frame = roundtrip(WsFrame::text("hello"));

        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.mask, None);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn test_masked_roundtrip_restores_payload() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let frame = roundtrip(WsFrame::binary(vec![1, 2, 3, 4, 5]).masked(key));

        assert_eq!(frame.mask, Some(key));
        assert_eq!(frame.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_extended_16_bit_length() {
        let payload = vec![7u8; 300];
        let mut wire = Vec::new();
        write_frame(&mut wire, &WsFrame::binary(payload.clone())).unwrap();

        // 126 marker plus two length bytes.
        assert_eq!(wire[1] & 0x7f, 126);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 300);

        let frame = read_frame(&mut Cursor::new(wire), 1024).unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_extended_64_bit_length() {
        let payload = vec![3u8; 70_000];
        let mut wire = Vec::new();
        write_frame(&mut wire, &WsFrame::binary(payload.clone())).unwrap();

        assert_eq!(wire[1] & 0x7f, 127);

        let frame = read_frame(&mut Cursor::new(wire), 128 * 1024).unwrap();
        assert_eq!(frame.payload.len(), 70_000);
    }

    #[test]
    fn test_mask_is_involutory() {
        let key = [0xaa, 0xbb, 0xcc, 0xdd];
        let mut payload = b"the quick brown fox".to_vec();

        apply_mask(&mut payload, key);
        assert_ne!(payload, b"the quick brown fox");

        apply_mask(&mut payload, key);
        assert_eq!(payload, b"the quick brown fox");
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let wire = vec![0xc1, 0x00]; // FIN + RSV1, Text, empty.

        assert!(matches!(
            read_frame(&mut Cursor::new(wire), 1024),
            Err(HttpError::WebSocketProtocol(_))
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let wire = vec![0x83, 0x00]; // FIN, opcode 0x3.

        assert!(matches!(
            read_frame(&mut Cursor::new(wire), 1024),
            Err(HttpError::WebSocketProtocol(_))
        ));
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let wire = vec![0x09, 0x00]; // FIN=0, Ping.

        assert!(matches!(
            read_frame(&mut Cursor::new(wire), 1024),
            Err(HttpError::WebSocketProtocol(_))
        ));
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let mut wire = Vec::new();
        let result = write_frame(&mut wire, &WsFrame::ping(vec![0u8; 200]))
            .and_then(|_| read_frame(&mut Cursor::new(wire), 1024).map(|_| ()));

        assert!(matches!(result, Err(HttpError::WebSocketProtocol(_))));
    }

    #[test]
    fn test_frame_over_message_cap_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &WsFrame::binary(vec![0u8; 2048])).unwrap();

        assert!(matches!(
            read_frame(&mut Cursor::new(wire), 1024),
            Err(HttpError::PayloadTooLarge)
        ));
    }

    #[test]
    fn test_close_payload_parsing() {
        let frame = WsFrame::close(1000, "bye");
        let (code, reason) = parse_close_payload(&frame.payload);

        assert_eq!(code, Some(1000));
        assert_eq!(reason, "bye");

        let (code, reason) = parse_close_payload(&[]);
        assert_eq!(code, None);
        assert_eq!(reason, "");

        // Invalid UTF-8 reasons are tolerated, decoded lossily.
        let (code, reason) = parse_close_payload(&[0x03, 0xe8, 0xff, 0xfe]);
        assert_eq!(code, Some(1000));
        assert_eq!(reason, "\u{fffd}\u{fffd}");
    }
}
