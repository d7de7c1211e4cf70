//! Message codec for wire framing
//!
//! Frames are newline-delimited JSON: one serialized message per line,
//! terminated by `\n`. JSON string escaping guarantees a serialized
//! message never contains a raw newline, so scanning for the terminator
//! is unambiguous. Blank lines between frames are tolerated and skipped,
//! as is an optional `\r` before the terminator.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum frame size (16 MB)
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Codec for the connecting side: encodes [`ClientMessage`], decodes [`ServerMessage`]
pub struct ClientCodec;

impl ClientCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

/// Codec for the broker side: encodes [`ServerMessage`], decodes [`ClientMessage`]
pub struct ServerCodec;

impl ServerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ServerCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

/// Generic frame decoding: scan for the line terminator, parse the line
fn decode_frame<T: DeserializeOwned>(src: &mut BytesMut) -> Result<Option<T>, CodecError> {
    loop {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            // No complete line yet. Refuse to buffer without bound.
            if src.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge {
                    size: src.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            return Ok(None);
        };

        let frame = src.split_to(newline + 1);
        let mut line = &frame[..newline];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: line.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let message = serde_json::from_slice(line)?;
        return Ok(Some(message));
    }
}

/// Generic frame encoding: serialize and append the line terminator
fn encode_frame<T: Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = serde_json::to_vec(item)?;

    if data.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    dst.reserve(data.len() + 1);
    dst.put_slice(&data);
    dst.put_u8(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, CommandEnvelope, ResponseEnvelope};
    use crate::PROTOCOL_VERSION;

    fn hello() -> ClientMessage {
        ClientMessage::Hello {
            role: crate::Role::Agent,
            project: None,
            token: None,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    // ==================== Roundtrip Tests ====================

    #[test]
    fn test_client_codec_roundtrip() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        client.encode(hello(), &mut buf).unwrap();
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, hello());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_server_codec_roundtrip() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        let message = ServerMessage::Response {
            response: ResponseEnvelope::ok("req-1"),
        };
        server.encode(message.clone(), &mut buf).unwrap();
        let decoded = client.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_all_client_variants_roundtrip() {
        let messages = vec![
            hello(),
            ClientMessage::Command {
                command: CommandEnvelope::new("demo", Action::GetViewHierarchy),
            },
            ClientMessage::Response {
                response: ResponseEnvelope::error("req-2", "nope"),
            },
            ClientMessage::Logs {
                entries: vec![crate::LogEntry::new("log", "hi")],
            },
            ClientMessage::DeviceInfo {
                device: crate::DeviceInfo::default(),
            },
            ClientMessage::ListTargets {
                id: "req-3".to_string(),
            },
            ClientMessage::Ping,
        ];

        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        for message in &messages {
            client.encode(message.clone(), &mut buf).unwrap();
        }
        for expected in &messages {
            let decoded = server.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(server.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_all_server_variants_roundtrip() {
        let messages = vec![
            ServerMessage::Welcome {
                protocol_version: PROTOCOL_VERSION,
            },
            ServerMessage::Command {
                command: CommandEnvelope::new("demo", Action::SubscribeLogs),
            },
            ServerMessage::Response {
                response: ResponseEnvelope::ok("req-4"),
            },
            ServerMessage::Log {
                event: crate::LogEvent {
                    project: "demo".to_string(),
                    level: "log".to_string(),
                    message: "line".to_string(),
                    timestamp: 1,
                },
            },
            ServerMessage::Error {
                code: crate::ErrorCode::BadEnvelope,
                message: "not an envelope".to_string(),
            },
            ServerMessage::Pong,
        ];

        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        for message in &messages {
            server.encode(message.clone(), &mut buf).unwrap();
        }
        for expected in &messages {
            let decoded = client.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&decoded, expected);
        }
    }

    // ==================== Framing Tests ====================

    #[test]
    fn test_partial_frame_returns_none() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        client.encode(hello(), &mut buf).unwrap();

        // Feed all but the final newline, then the rest
        let tail = buf.split_off(buf.len() - 1);
        assert!(server.decode(&mut buf).unwrap().is_none());

        buf.unsplit(tail);
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, hello());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(b"\n\r\n");
        client.encode(ClientMessage::Ping, &mut buf).unwrap();

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, ClientMessage::Ping);
    }

    #[test]
    fn test_crlf_terminator_tolerated() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(b"{\"type\":\"ping\"}\r\n");

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, ClientMessage::Ping);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_embedded_newline_is_escaped() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        let message = ClientMessage::Logs {
            entries: vec![crate::LogEntry::new("log", "line one\nline two")],
        };
        client.encode(message.clone(), &mut buf).unwrap();

        // Exactly one raw newline: the frame terminator
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(b"{\"type\":\"ping\"\n");

        let result = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_unbounded_frame() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();
        buf.resize(MAX_FRAME_SIZE + 1, b'a');

        let result: Result<Option<ClientMessage>, _> = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();

        let message = ClientMessage::Logs {
            entries: vec![crate::LogEntry::new("log", "x".repeat(MAX_FRAME_SIZE + 1))],
        };
        let result = client.encode(message, &mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_trailing_partial_stays_buffered() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        client.encode(ClientMessage::Ping, &mut buf).unwrap();
        buf.put_slice(b"{\"type\":\"pi");

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, ClientMessage::Ping);
        assert!(server.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"{\"type\":\"pi");
    }
}
