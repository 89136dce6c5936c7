use flate2::{Decompress, FlushDecompress, Status};
use tracing::trace;

use super::constants::{GatewayOpcode, ZLIB_SUFFIX};
use super::error::{DecodeError, GatewayError, GatewayResult};
use super::payloads::Envelope;

const INITIAL_BUFFER_SIZE: usize = 32 * 1024;
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// A raw message as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns transport frames into envelopes and back.
///
/// With zlib-stream compression every binary frame is a chunk of one shared
/// deflate stream; a message is complete once the buffered chunks end with the
/// sync-flush suffix. A codec is bound to one transport and must be replaced
/// (or [`reset`](Self::reset)) whenever the transport is.
pub struct EnvelopeCodec {
    inflater: Option<Decompress>,
    compressed_buffer: Vec<u8>,
    decompressed_buffer: Vec<u8>,
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new(compressed: bool) -> Self {
        Self {
            inflater: compressed.then(|| Decompress::new(true)),
            compressed_buffer: Vec::with_capacity(4096),
            decompressed_buffer: Vec::with_capacity(INITIAL_BUFFER_SIZE),
        }
    }

    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.inflater.is_some()
    }

    /// Decodes one frame. Returns `Ok(None)` while a compressed message is
    /// still incomplete.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` for frames that are not envelopes and
    /// `DecodeError::Inflate` when the compressed stream is corrupt.
    pub fn decode(&mut self, frame: Frame) -> Result<Option<Envelope>, DecodeError> {
        match frame {
            Frame::Text(text) => Self::parse(text.as_bytes()).map(Some),
            Frame::Binary(data) if self.inflater.is_some() => {
                self.compressed_buffer.extend_from_slice(&data);

                if self.compressed_buffer.len() > MAX_BUFFER_SIZE {
                    self.compressed_buffer.clear();
                    return Err(DecodeError::Oversized {
                        limit: MAX_BUFFER_SIZE,
                    });
                }

                if !self.is_message_complete() {
                    trace!(buffered = self.compressed_buffer.len(), "Partial frame buffered");
                    return Ok(None);
                }

                let result = self.inflate();
                self.compressed_buffer.clear();
                result?;
                Self::parse(&self.decompressed_buffer).map(Some)
            }
            Frame::Binary(data) => Self::parse(&data).map(Some),
        }
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the envelope cannot be encoded.
    pub fn encode(envelope: &Envelope) -> GatewayResult<Frame> {
        serde_json::to_string(envelope)
            .map(Frame::Text)
            .map_err(|e| GatewayError::serialization(e.to_string()))
    }

    /// Parses an uncompressed envelope.
    ///
    /// Sequence numbers are kept only on dispatch envelopes, and unknown
    /// opcodes pass through without an event name.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the bytes are not an envelope.
    pub fn parse(bytes: &[u8]) -> Result<Envelope, DecodeError> {
        let mut envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(e.to_string()))?;

        match envelope.kind() {
            Some(GatewayOpcode::Dispatch) => {
                if envelope.event_name.is_none() {
                    return Err(DecodeError::malformed("dispatch without event name"));
                }
            }
            Some(_) => envelope.sequence = None,
            None => {
                envelope.sequence = None;
                envelope.event_name = None;
            }
        }

        Ok(envelope)
    }

    fn is_message_complete(&self) -> bool {
        self.compressed_buffer.len() >= ZLIB_SUFFIX.len()
            && self.compressed_buffer[self.compressed_buffer.len() - ZLIB_SUFFIX.len()..]
                == ZLIB_SUFFIX
    }

    fn inflate(&mut self) -> Result<(), DecodeError> {
        let Self {
            inflater,
            compressed_buffer,
            decompressed_buffer,
        } = self;
        let Some(inflater) = inflater.as_mut() else {
            return Err(DecodeError::inflate("stream compression not negotiated"));
        };

        decompressed_buffer.clear();
        let mut offset = 0;

        loop {
            if decompressed_buffer.len() == decompressed_buffer.capacity() {
                if decompressed_buffer.capacity() >= MAX_BUFFER_SIZE {
                    return Err(DecodeError::Oversized {
                        limit: MAX_BUFFER_SIZE,
                    });
                }
                let additional = decompressed_buffer.capacity().max(INITIAL_BUFFER_SIZE);
                decompressed_buffer.reserve(additional);
            }

            let in_before = inflater.total_in();
            let out_before = inflater.total_out();

            let status = inflater
                .decompress_vec(
                    &compressed_buffer[offset..],
                    decompressed_buffer,
                    FlushDecompress::Sync,
                )
                .map_err(|e| DecodeError::inflate(e.to_string()))?;

            let consumed = usize::try_from(inflater.total_in() - in_before).unwrap_or(0);
            let produced = inflater.total_out() - out_before;
            offset += consumed;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let input_done = offset >= compressed_buffer.len();
                    let output_room = decompressed_buffer.len() < decompressed_buffer.capacity();
                    if input_done && output_room {
                        break;
                    }
                    if consumed == 0 && produced == 0 && output_room {
                        return Err(DecodeError::inflate("inflater made no progress"));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        if let Some(inflater) = self.inflater.as_mut() {
            inflater.reset(true);
        }
        self.compressed_buffer.clear();
        self.decompressed_buffer.clear();
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};
    use serde_json::json;

    fn compress_chunk(compressor: &mut Compress, json: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(json.len() + 128);
        compressor
            .compress_vec(json.as_bytes(), &mut out, FlushCompress::Sync)
            .unwrap();
        out
    }

    #[test]
    fn test_decode_dispatch_text_frame() {
        let mut codec = EnvelopeCodec::new(false);
        let frame = Frame::Text(r#"{"op":0,"s":5,"t":"MESSAGE_CREATE","d":{"id":"1"}}"#.into());

        let envelope = codec.decode(frame).unwrap().unwrap();
        assert_eq!(envelope.kind(), Some(GatewayOpcode::Dispatch));
        assert_eq!(envelope.sequence, Some(5));
        assert_eq!(envelope.event_name.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(envelope.data, json!({"id": "1"}));
    }

    #[test]
    fn test_unknown_opcode_passes_through() {
        let mut codec = EnvelopeCodec::new(false);
        let frame = Frame::Text(r#"{"op":42,"s":9,"t":"FUTURE_THING","d":{"x":true}}"#.into());

        let envelope = codec.decode(frame).unwrap().unwrap();
        assert_eq!(envelope.opcode, 42);
        assert_eq!(envelope.kind(), None);
        assert_eq!(envelope.event_name, None);
        assert_eq!(envelope.sequence, None);
        assert_eq!(envelope.data, json!({"x": true}));
    }

    #[test]
    fn test_opcode_beyond_known_range_passes_through() {
        let envelope = EnvelopeCodec::parse(br#"{"op":900,"d":null}"#).unwrap();
        assert_eq!(envelope.opcode, 900);
        assert_eq!(envelope.kind(), None);
        assert_eq!(envelope.data, json!(null));

        let envelope = EnvelopeCodec::parse(br#"{"op":266,"d":{}}"#).unwrap();
        assert_eq!(envelope.kind(), None);
    }

    #[test]
    fn test_non_dispatch_sequence_is_dropped() {
        let envelope =
            EnvelopeCodec::parse(br#"{"op":11,"s":3,"t":null,"d":null}"#).unwrap();
        assert_eq!(envelope.kind(), Some(GatewayOpcode::HeartbeatAck));
        assert_eq!(envelope.sequence, None);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        let mut codec = EnvelopeCodec::new(false);
        for raw in [
            "",
            "{",
            r#"{"op":"ten"}"#,
            r#"{"d":{}}"#,
            r#"{"op":0,"s":1,"d":{}}"#,
            r#"{"op":-1,"d":null}"#,
        ] {
            let result = codec.decode(Frame::Text(raw.to_string()));
            assert!(
                matches!(result, Err(DecodeError::Malformed { .. })),
                "expected malformed for {raw:?}, got {result:?}"
            );
        }

        let binary = codec.decode(Frame::Binary(vec![0xff, 0xfe, 0x00]));
        assert!(matches!(binary, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_zlib_stream_messages_share_context() {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut codec = EnvelopeCodec::new(true);

        let hello = compress_chunk(&mut compressor, r#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
        let ack = compress_chunk(&mut compressor, r#"{"op":11,"d":null}"#);

        let first = codec.decode(Frame::Binary(hello)).unwrap().unwrap();
        assert_eq!(first.kind(), Some(GatewayOpcode::Hello));
        assert_eq!(first.data["heartbeat_interval"], json!(41250));

        let second = codec.decode(Frame::Binary(ack)).unwrap().unwrap();
        assert_eq!(second.kind(), Some(GatewayOpcode::HeartbeatAck));
    }

    #[test]
    fn test_zlib_stream_split_message_is_buffered() {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut codec = EnvelopeCodec::new(true);

        let chunk = compress_chunk(
            &mut compressor,
            r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc"}}"#,
        );
        let (head, tail) = chunk.split_at(chunk.len() / 2);

        assert_eq!(codec.decode(Frame::Binary(head.to_vec())).unwrap(), None);
        let envelope = codec.decode(Frame::Binary(tail.to_vec())).unwrap().unwrap();
        assert_eq!(envelope.event_name.as_deref(), Some("READY"));
        assert_eq!(envelope.sequence, Some(1));
    }

    #[test]
    fn test_corrupt_compressed_frame_does_not_panic() {
        let mut codec = EnvelopeCodec::new(true);
        let mut garbage = vec![0x12, 0x34, 0x56, 0x78, 0x9a];
        garbage.extend_from_slice(&ZLIB_SUFFIX);

        let result = codec.decode(Frame::Binary(garbage));
        assert!(result.is_err());
        assert!(result.unwrap_err().poisons_stream());
    }

    #[test]
    fn test_encode_skips_absent_fields() {
        let frame = EnvelopeCodec::encode(&Envelope::heartbeat(Some(7))).unwrap();
        assert_eq!(frame, Frame::Text(r#"{"op":1,"d":7}"#.to_string()));
    }
}
