//! Framed codec for byte-stream host channels.
//!
//! Each frame is a 4-byte big-endian length followed by one wire document
//! as a JSON object of string values. Framing and content are reported
//! separately: a frame whose body is not a wire document decodes to
//! `Some(Err(MalformedFrame))` and the stream stays usable, while a broken
//! length prefix or an oversized frame is an `io::Error` that ends it.

use std::io;

use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::bridge::protocol::WireDocument;

/// Largest frame accepted from the peer unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// A complete frame whose body is not a flat string-keyed JSON object.
#[derive(Debug, thiserror::Error)]
#[error("malformed wire document ({len} bytes): {source}")]
pub struct MalformedFrame {
    pub len: usize,
    #[source]
    pub source: serde_json::Error,
}

pub struct WireCodec {
    frames: LengthDelimitedCodec,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }
}

impl Decoder for WireCodec {
    type Item = Result<WireDocument, MalformedFrame>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        let document = serde_json::from_slice::<WireDocument>(&frame).map_err(|source| {
            MalformedFrame {
                len: frame.len(),
                source,
            }
        });
        Ok(Some(document))
    }
}

impl Encoder<WireDocument> for WireCodec {
    type Error = io::Error;

    fn encode(&mut self, document: WireDocument, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&document)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_bytes = body.len(), fields = document.len(), "Encoding frame");
        self.frames.encode(Bytes::from(body), dst)
    }
}
