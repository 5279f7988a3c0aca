//! Frame codec
//!
//! Each message is one JSON object. Over WebSocket a text frame carries one
//! message; over raw TCP messages are separated by `\n`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{ClientMessage, ServerMessage};
use bytes::BytesMut;
use codesync_core::RoomId;
use serde::Serialize;
use serde_json::Value;

/// Maximum size of a single message (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Splits a byte stream into newline-delimited frames
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    /// Add data to the decoder buffer
    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let pending = match self.buffer.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.buffer.len() - pos - 1,
            None => self.buffer.len(),
        };
        if pending + data.len() > self.max_frame && !data.contains(&b'\n') {
            let size = pending + data.len();
            self.buffer.clear();
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_frame,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Take the next complete frame, skipping blank lines
    pub fn next_frame(&mut self) -> ProtocolResult<Option<BytesMut>> {
        loop {
            let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => return Ok(None),
            };

            let mut line = self.buffer.split_to(line_end + 1);
            line.truncate(line_end);
            if line.last() == Some(&b'\r') {
                line.truncate(line_end - 1);
            }

            if line.len() > self.max_frame {
                return Err(ProtocolError::MessageTooLarge {
                    size: line.len(),
                    max: self.max_frame,
                });
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Bytes buffered but not yet framed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one client message.
///
/// Frames that are not JSON yield `InvalidJson`. Frames naming a room with an
/// invalid ID yield `InvalidRoom`. Anything else that fails the schema yields
/// `InvalidMessage`.
pub fn decode_client(frame: &[u8]) -> ProtocolResult<ClientMessage> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let value: Value =
        serde_json::from_slice(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    if let Some(Value::String(raw)) = value.get("roomId") {
        if let Err(e) = RoomId::new(raw.as_str()) {
            return Err(ProtocolError::InvalidRoom(e.to_string()));
        }
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
}

/// Decode one server message
pub fn decode_server(frame: &[u8]) -> ProtocolResult<ServerMessage> {
    serde_json::from_slice(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Encode a message as a single JSON text
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<String> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Encode a message terminated by `\n` for stream transports
pub fn encode_line<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    out.push(b'\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_on_newline() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"{\"type\":\"ping\"}\r\n\n{\"type\":").unwrap();

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&first[..], b"{\"type\":\"ping\"}");
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.feed(b"\"ping\"}\n").unwrap();
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(decode_client(&second).unwrap(), ClientMessage::Ping);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::with_max_frame(8);
        let err = decoder.feed(b"0123456789").unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { size: 10, max: 8 }));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_line_in_one_chunk() {
        let mut decoder = FrameDecoder::with_max_frame(4);
        decoder.feed(b"0123456789\n{}\n").unwrap();
        assert!(decoder.next_frame().is_err());
        assert_eq!(&decoder.next_frame().unwrap().unwrap()[..], b"{}");
    }

    #[test]
    fn test_decode_errors_are_classified() {
        assert_eq!(decode_client(b"not json").unwrap_err().code(), "PARSE_ERROR");
        assert_eq!(
            decode_client(br#"{"type":"teleport"}"#).unwrap_err().code(),
            "INVALID_MESSAGE"
        );
        assert_eq!(
            decode_client(br#"{"type":"leave-room","roomId":"no spaces"}"#)
                .unwrap_err()
                .code(),
            "INVALID_ROOM"
        );
        assert_eq!(
            decode_client(br#"{"type":"sync-update","roomId":"abc","update":"x"}"#)
                .unwrap_err()
                .code(),
            "INVALID_MESSAGE"
        );
    }

    #[test]
    fn test_encode_line_is_newline_terminated() {
        let bytes = encode_line(&ServerMessage::Pong).unwrap();
        assert_eq!(bytes, b"{\"type\":\"pong\"}\n");
        assert_eq!(decode_server(&bytes[..bytes.len() - 1]).unwrap(), ServerMessage::Pong);
    }

    #[test]
    fn test_error_message_encoding() {
        let text = encode(&ServerMessage::error("INVALID_ROOM", "bad id")).unwrap();
        assert_eq!(text, r#"{"type":"error","code":"INVALID_ROOM","message":"bad id"}"#);
    }
}
