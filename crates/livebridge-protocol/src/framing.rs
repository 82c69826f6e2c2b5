//! WebSocket-style binary framing for the stream transport.
//!
//! Each frame starts with a two byte header, an optional extended length
//! and, for client frames, a four byte masking key:
//!
//! ```text
//! +-----+------+------+---------+----------------+-----------+---------+
//! | FIN | RSV  |opcode| MASK    | len (7)        | ext len   | mask key|
//! | 1b  | 3b   | 4b   | 1b      | 126 => 16 bit  | 0/2/8 B   | 0/4 B   |
//! |     |      |      |         | 127 => 64 bit  |           |         |
//! +-----+------+------+---------+----------------+-----------+---------+
//! ```
//!
//! Client frames must be masked. The bridge answers with unmasked binary
//! frames carrying zlib-compressed JSON.

use std::io::{ErrorKind, Read, Write};

use serde::{Serialize, de::DeserializeOwned};

use crate::MAX_MESSAGE_SIZE;
use crate::compression::{decode_json, encode_json};
use crate::error::{ProtocolError, ProtocolResult};

/// Frame opcodes.
pub mod opcode {
    /// Continuation of a fragmented message.
    pub const CONTINUATION: u8 = 0x0;
    /// UTF-8 text.
    pub const TEXT: u8 = 0x1;
    /// Binary data.
    pub const BINARY: u8 = 0x2;
    /// Connection close.
    pub const CLOSE: u8 = 0x8;
    /// Ping.
    pub const PING: u8 = 0x9;
    /// Pong.
    pub const PONG: u8 = 0xA;
}

const FIN_BIT: u8 = 0b1000_0000;
const MASK_BIT: u8 = 0b1000_0000;
const OPCODE_MASK: u8 = 0b0000_1111;
const LEN_MASK: u8 = 0b0111_1111;

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Last frame of the message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: u8,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a final frame.
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    /// Creates a binary frame.
    pub fn binary(payload: Vec<u8>) -> Self {
        Self::new(opcode::BINARY, payload)
    }

    /// Creates a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(opcode::TEXT, text.into().into_bytes())
    }

    /// Creates a close frame.
    pub fn close() -> Self {
        Self::new(opcode::CLOSE, Vec::new())
    }

    /// Creates a pong frame echoing a ping payload.
    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(opcode::PONG, payload)
    }

    /// Returns true for close, ping and pong frames.
    pub fn is_control(&self) -> bool {
        self.opcode & 0x8 != 0
    }

    /// Encodes the frame, masking the payload when a key is given.
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        let first = if self.fin { FIN_BIT } else { 0 } | (self.opcode & OPCODE_MASK);
        out.push(first);

        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
        if len <= 125 {
            out.push(mask_bit | len as u8);
        } else if let Ok(short) = u16::try_from(len) {
            out.push(mask_bit | 126);
            out.extend_from_slice(&short.to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                out.extend(apply_mask(&self.payload, key));
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }
}

/// A complete message assembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (plain JSON).
    Text(String),
    /// Binary message (zlib-compressed JSON).
    Binary(Vec<u8>),
    /// Ping with its payload.
    Ping(Vec<u8>),
    /// Pong with its payload.
    Pong(Vec<u8>),
    /// Close request.
    Close,
}

impl Message {
    /// Parses the JSON carried by a data message.
    ///
    /// Returns `Ok(None)` for control messages.
    pub fn decode_json<T: DeserializeOwned>(&self) -> ProtocolResult<Option<T>> {
        match self {
            Self::Text(text) => Ok(Some(serde_json::from_str(text)?)),
            Self::Binary(data) => decode_json(data).map(Some),
            Self::Ping(_) | Self::Pong(_) | Self::Close => Ok(None),
        }
    }
}

fn apply_mask(payload: &[u8], key: [u8; 4]) -> impl Iterator<Item = u8> + '_ {
    payload
        .iter()
        .zip(key.into_iter().cycle())
        .map(|(byte, k)| byte ^ k)
}

/// Encodes a message as one unmasked binary frame of compressed JSON.
///
/// # Example
///
/// ```rust
/// use livebridge_protocol::{Response, decode_message, encode_message};
///
/// let response = Response::result(serde_json::json!([1, 2]), Some("a1".into()));
/// let bytes = encode_message(&response).unwrap();
/// let decoded: Response = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, response);
/// ```
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let compressed = encode_json(message)?;
    Ok(Frame::binary(compressed).encode(None))
}

/// Decodes a message from the bytes of one complete frame.
///
/// Masked and unmasked frames are both accepted.
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    let mut reader = FrameReader::lenient(data);
    let message = reader.read_message()?.ok_or(ProtocolError::IncompleteFrame)?;
    message
        .decode_json()?
        .ok_or(ProtocolError::FrameSequence("control frame carries no message"))
}

/// Reads frames from a byte stream.
///
/// This struct wraps a reader and provides methods to read complete frames
/// and messages.
pub struct FrameReader<R> {
    reader: R,
    require_mask: bool,
    partial: Option<(u8, Vec<u8>)>,
}

impl<R: Read> FrameReader<R> {
    /// Creates a reader for client-to-server traffic; unmasked frames are
    /// rejected.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            require_mask: true,
            partial: None,
        }
    }

    /// Creates a reader that accepts unmasked frames.
    pub fn lenient(reader: R) -> Self {
        Self {
            reader,
            require_mask: false,
            partial: None,
        }
    }

    /// Reads a single frame.
    ///
    /// Returns `Ok(None)` if the stream ends before the next frame starts.
    pub fn read_frame(&mut self) -> ProtocolResult<Option<Frame>> {
        let mut header = [0u8; 2];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let [first, second] = header;

        let fin = first & FIN_BIT != 0;
        let opcode = first & OPCODE_MASK;
        let masked = second & MASK_BIT != 0;

        if self.require_mask && !masked {
            return Err(ProtocolError::UnmaskedFrame);
        }

        let len = match second & LEN_MASK {
            126 => {
                let mut buf = [0u8; 2];
                self.read_exact(&mut buf)?;
                u64::from(u16::from_be_bytes(buf))
            }
            127 => {
                let mut buf = [0u8; 8];
                self.read_exact(&mut buf)?;
                u64::from_be_bytes(buf)
            }
            short => u64::from(short),
        };

        if len > MAX_MESSAGE_SIZE as u64 {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE as u64,
            });
        }

        let key = if masked {
            let mut key = [0u8; 4];
            self.read_exact(&mut key)?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; len as usize];
        self.read_exact(&mut payload)?;
        if let Some(key) = key {
            payload = apply_mask(&payload, key).collect();
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload,
        }))
    }

    /// Reads a complete message, joining continuation frames.
    ///
    /// Control frames interleaved with a fragmented message are returned
    /// immediately and the fragments are kept for the next call. Returns
    /// `Ok(None)` at end of stream.
    pub fn read_message(&mut self) -> ProtocolResult<Option<Message>> {
        loop {
            let Some(frame) = self.read_frame()? else {
                return match self.partial.take() {
                    None => Ok(None),
                    Some(_) => Err(ProtocolError::IncompleteFrame),
                };
            };

            match frame.opcode {
                opcode::CLOSE => return Ok(Some(Message::Close)),
                opcode::PING => return Ok(Some(Message::Ping(frame.payload))),
                opcode::PONG => return Ok(Some(Message::Pong(frame.payload))),
                opcode::TEXT | opcode::BINARY => {
                    if self.partial.is_some() {
                        return Err(ProtocolError::FrameSequence(
                            "new message before previous one finished",
                        ));
                    }
                    self.partial = Some((frame.opcode, frame.payload));
                }
                opcode::CONTINUATION => match self.partial.as_mut() {
                    Some((_, data)) => data.extend_from_slice(&frame.payload),
                    None => {
                        return Err(ProtocolError::FrameSequence(
                            "continuation without a message",
                        ));
                    }
                },
                other => return Err(ProtocolError::UnsupportedOpcode(other)),
            }

            if let Some((_, data)) = self.partial.as_ref()
                && data.len() > MAX_MESSAGE_SIZE
            {
                let size = data.len() as u64;
                self.partial = None;
                return Err(ProtocolError::MessageTooLarge {
                    size,
                    max: MAX_MESSAGE_SIZE as u64,
                });
            }

            if frame.fin
                && let Some((kind, data)) = self.partial.take()
            {
                let message = if kind == opcode::TEXT {
                    Message::Text(String::from_utf8(data)?)
                } else {
                    Message::Binary(data)
                };
                return Ok(Some(message));
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> ProtocolResult<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                ProtocolError::IncompleteFrame
            } else {
                ProtocolError::Io(e)
            }
        })
    }

    /// Returns a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this FrameReader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes server frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one unmasked frame.
    pub fn write_frame(&mut self, frame: &Frame) -> ProtocolResult<()> {
        self.writer.write_all(&frame.encode(None))?;
        Ok(())
    }

    /// Writes a message as compressed JSON in a binary frame.
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> ProtocolResult<()> {
        let data = encode_message(message)?;
        self.writer.write_all(&data)?;
        Ok(())
    }

    /// Writes pre-encoded frame bytes.
    pub fn write_encoded(&mut self, data: &[u8]) -> ProtocolResult<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};
    use serde_json::json;
    use std::io::Cursor;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn short_frame_header() {
        let bytes = Frame::text("Hello").encode(None);
        assert_eq!(&bytes[..2], &[0x81, 0x05]);
        assert_eq!(&bytes[2..], b"Hello");
    }

    #[test]
    fn masked_frame_matches_rfc_example() {
        let bytes = Frame::text("Hello").encode(Some(KEY));
        assert_eq!(
            bytes,
            vec![
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );

        let frame = FrameReader::new(Cursor::new(bytes))
            .read_frame()
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, b"Hello");
        assert!(frame.fin);
    }

    #[test]
    fn sixteen_bit_length() {
        let frame = Frame::binary(vec![7; 300]);
        let bytes = frame.encode(None);
        assert_eq!(bytes[1], 126);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 300);

        let decoded = FrameReader::lenient(Cursor::new(bytes))
            .read_frame()
            .unwrap()
            .unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn sixty_four_bit_length() {
        let frame = Frame::binary(vec![1; 70_000]);
        let bytes = frame.encode(Some(KEY));
        assert_eq!(bytes[1], 0x80 | 127);
        assert_eq!(
            u64::from_be_bytes(bytes[2..10].try_into().unwrap()),
            70_000
        );

        let decoded = FrameReader::new(Cursor::new(bytes))
            .read_frame()
            .unwrap()
            .unwrap();
        assert_eq!(decoded.payload.len(), 70_000);
        assert!(decoded.payload.iter().all(|b| *b == 1));
    }

    #[test]
    fn unmasked_client_frame_is_rejected() {
        let bytes = Frame::text("{}").encode(None);
        let result = FrameReader::new(Cursor::new(bytes)).read_frame();
        assert!(matches!(result, Err(ProtocolError::UnmaskedFrame)));
    }

    #[test]
    fn empty_stream_is_end_of_messages() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.read_message().unwrap().is_none());
    }

    #[test]
    fn truncated_payload_is_incomplete() {
        let mut bytes = Frame::text("Hello").encode(Some(KEY));
        bytes.truncate(8);
        let result = FrameReader::new(Cursor::new(bytes)).read_frame();
        assert!(matches!(result, Err(ProtocolError::IncompleteFrame)));
    }

    #[test]
    fn fragmented_text_is_joined() {
        let mut bytes = Frame {
            fin: false,
            opcode: opcode::TEXT,
            payload: b"{\"ns\":\"song\",".to_vec(),
        }
        .encode(Some(KEY));
        bytes.extend(Frame::new(opcode::PING, b"hi".to_vec()).encode(Some(KEY)));
        bytes.extend(
            Frame {
                fin: true,
                opcode: opcode::CONTINUATION,
                payload: b"\"name\":\"get_tracks\"}".to_vec(),
            }
            .encode(Some(KEY)),
        );

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(
            reader.read_message().unwrap(),
            Some(Message::Ping(b"hi".to_vec()))
        );
        let message = reader.read_message().unwrap().unwrap();
        let request: Request = message.decode_json().unwrap().unwrap();
        assert_eq!(request, Request::new("song", "get_tracks"));
    }

    #[test]
    fn close_frame_ends_conversation() {
        let bytes = Frame::close().encode(Some(KEY));
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_message().unwrap(), Some(Message::Close));
    }

    #[test]
    fn continuation_without_start_is_rejected() {
        let bytes = Frame::new(opcode::CONTINUATION, b"x".to_vec()).encode(Some(KEY));
        let result = FrameReader::new(Cursor::new(bytes)).read_message();
        assert!(matches!(result, Err(ProtocolError::FrameSequence(_))));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let bytes = Frame::new(0x3, Vec::new()).encode(Some(KEY));
        let result = FrameReader::new(Cursor::new(bytes)).read_message();
        assert!(matches!(result, Err(ProtocolError::UnsupportedOpcode(0x3))));
    }

    #[test]
    fn writer_emits_compressed_binary_frames() {
        let response = Response::result(json!({"name": "Drums"}), Some("a1".into()));
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write_message(&response).unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(buffer[0], 0x82);
        assert_eq!(buffer[1] & MASK_BIT, 0);
        let decoded: Response = decode_message(&buffer).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn text_payload_must_be_utf8() {
        let mut bytes = Frame::new(opcode::TEXT, vec![0xff, 0xfe]).encode(Some(KEY));
        bytes.extend(Frame::text("{}").encode(Some(KEY)));
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let result = reader.read_message();
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8(_))));
        // The bad frame was consumed whole; the next one still reads.
        assert_eq!(
            reader.read_message().unwrap(),
            Some(Message::Text("{}".into()))
        );
    }
}
