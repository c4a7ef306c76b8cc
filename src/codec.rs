//! Frame codec for blob streams over HTTP
//!
//! Each frame is `tag: u8 | len: u32 (big endian) | payload`. Header frames
//! carry a JSON [`BlobHeader`], content frames carry raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::models::{BlobFrame, BlobHeader, MAX_CHUNK_SIZE};

/// Media type of a framed blob stream.
pub const FRAMES_CONTENT_TYPE: &str = "application/x-gitrpc-frames";

const TAG_HEADER: u8 = 1;
const TAG_CONTENT: u8 = 2;
const PREFIX_LEN: usize = 5;
/// Header payloads are small JSON documents; anything larger is corrupt.
const MAX_HEADER_LEN: usize = 4096;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),

    #[error("frame of {len} bytes exceeds limit of {limit}")]
    TooLarge { len: usize, limit: usize },

    #[error("empty content frame")]
    EmptyContent,

    #[error("malformed header frame: {0}")]
    MalformedHeader(String),

    #[error("stream ended inside a frame ({0} bytes left over)")]
    Truncated(usize),

    #[error("failed to encode header frame: {0}")]
    Encode(String),
}

// == Encode ==
pub fn encode_frame(frame: &BlobFrame) -> Result<Bytes, CodecError> {
    let (tag, payload) = match frame {
        BlobFrame::Header(header) => {
            let json =
                serde_json::to_vec(header).map_err(|e| CodecError::Encode(e.to_string()))?;
            (TAG_HEADER, Bytes::from(json))
        }
        BlobFrame::Content(data) => (TAG_CONTENT, data.clone()),
    };

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

// == Decode ==
/// Incremental decoder: feed bytes as they arrive, pull complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<BlobFrame>, CodecError> {
        if self.buf.len() < PREFIX_LEN {
            return Ok(None);
        }

        let tag = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        let limit = match tag {
            TAG_HEADER => MAX_HEADER_LEN,
            TAG_CONTENT => MAX_CHUNK_SIZE,
            other => return Err(CodecError::UnknownTag(other)),
        };
        if len > limit {
            return Err(CodecError::TooLarge { len, limit });
        }
        if self.buf.len() < PREFIX_LEN + len {
            return Ok(None);
        }

        self.buf.advance(PREFIX_LEN);
        let payload = self.buf.split_to(len).freeze();

        match tag {
            TAG_HEADER => serde_json::from_slice::<BlobHeader>(&payload)
                .map(|header| Some(BlobFrame::Header(header)))
                .map_err(|e| CodecError::MalformedHeader(e.to_string())),
            _ if payload.is_empty() => Err(CodecError::EmptyContent),
            _ => Ok(Some(BlobFrame::Content(payload))),
        }
    }

    /// Checks that the stream did not stop in the middle of a frame.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Truncated(self.buf.len()))
        }
    }
}

/// Decodes a complete framed body.
pub fn decode_all(data: &[u8]) -> Result<Vec<BlobFrame>, CodecError> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(data);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }
    decoder.finish()?;
    Ok(frames)
}
