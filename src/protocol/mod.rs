//! Wire protocol: length-prefixed JSON frames.
//!
//! - `frame`: length prefix handling, wait-all reads, encoding
//! - `recovery`: brace-balance scan used by lenient decoding
//! - `message`: payload to JSON object, object to command message

pub mod frame;
pub mod message;
pub mod recovery;

pub use frame::{encode_frame, read_frame, write_frame, FrameError, FrameSection, MAX_FRAME_BYTES};
pub use message::{CommandMessage, Decoding, Document, MessageError};

use std::io::Read;

/// Frame codec settings shared by every connection of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    pub max_frame_bytes: usize,
    pub decoding: Decoding,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            decoding: Decoding::Lenient,
        }
    }
}

impl FrameCodec {
    /// Read one frame and decode its payload into a JSON object.
    pub fn decode<R: Read>(&self, reader: &mut R) -> Result<Document, FrameError> {
        let payload = read_frame(reader, self.max_frame_bytes)?;
        self.decoding.decode(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Cursor;

    fn wire(payload: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(encode_frame(payload).unwrap().to_vec())
    }

    #[test]
    fn test_decode_frame() {
        let codec = FrameCodec::default();
        let doc = codec
            .decode(&mut wire(br#"{"command":"ping","params":{}}"#))
            .unwrap();
        assert_eq!(doc["command"], "ping");
    }

    #[test]
    fn test_structure_survives_encode_decode() {
        let original = json!({
            "command": "spawn",
            "params": {
                "name": "widget",
                "count": 3,
                "scale": 1.5,
                "visible": true,
                "parent": null,
                "tags": ["a", "b", 7],
                "transform": {"location": [0.0, 10.0, -2.5]}
            }
        });
        let payload = serde_json::to_vec(&original).unwrap();

        for decoding in [Decoding::Strict, Decoding::Lenient] {
            let codec = FrameCodec {
                decoding,
                ..FrameCodec::default()
            };
            let doc = codec.decode(&mut wire(&payload)).unwrap();
            assert_eq!(Value::Object(doc), original);
        }
    }

    #[test]
    fn test_lenient_codec_recovers_miscounted_payload() {
        let codec = FrameCodec::default();
        let doc = codec
            .decode(&mut wire(b"{\"command\":\"ping\"}\0\0\0\0pad"))
            .unwrap();
        assert_eq!(doc["command"], "ping");
    }

    #[test]
    fn test_strict_codec_rejects_padding() {
        let codec = FrameCodec {
            decoding: Decoding::Strict,
            ..FrameCodec::default()
        };
        let err = codec
            .decode(&mut wire(b"{\"command\":\"ping\"}\0\0\0\0pad"))
            .unwrap_err();
        assert!(matches!(err, FrameError::Parse { .. }));
    }

    #[test]
    fn test_unbalanced_payload_fails() {
        let err = FrameCodec::default().decode(&mut wire(br#"{"a":1"#)).unwrap_err();
        assert!(matches!(err, FrameError::Parse { .. }));
    }
}
