//! Blob stream frames
//!
//! A blob response is exactly one header frame followed by zero or more
//! content frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Largest content frame, and the read buffer size of the streaming handler.
pub const MAX_CHUNK_SIZE: usize = 16384;

/// First frame of every blob response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobHeader {
    pub sha: String,
    pub size: i64,
    pub content_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobFrame {
    Header(BlobHeader),
    /// Non-empty slice of blob content, at most [`MAX_CHUNK_SIZE`] bytes
    Content(Bytes),
}

impl BlobFrame {
    pub fn is_header(&self) -> bool {
        matches!(self, BlobFrame::Header(_))
    }

    /// Content bytes carried by the frame, empty for a header.
    pub fn content_len(&self) -> usize {
        match self {
            BlobFrame::Header(_) => 0,
            BlobFrame::Content(data) => data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_serializes_camel_case() {
        let header = BlobHeader {
            sha: "abc".to_string(),
            size: 10,
            content_size: 5,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(json, r#"{"sha":"abc","size":10,"contentSize":5}"#);
    }

    #[test]
    fn test_content_len() {
        assert_eq!(BlobFrame::Content(Bytes::from_static(b"abc")).content_len(), 3);
        let header = BlobFrame::Header(BlobHeader {
            sha: "abc".to_string(),
            size: 3,
            content_size: 3,
        });
        assert!(header.is_header());
        assert_eq!(header.content_len(), 0);
    }
}
