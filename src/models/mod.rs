//! Request and Response models for the RPC API
//!
//! This module defines the messages exchanged with callers, both the JSON
//! bodies and the frames of the blob stream.

pub mod frames;
pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use frames::{BlobFrame, BlobHeader, MAX_CHUNK_SIZE};
pub use requests::{GetBlobRequest, GetLastCommitRequest, RepoBase};
pub use responses::{ErrorResponse, HealthResponse, StatsResponse};
