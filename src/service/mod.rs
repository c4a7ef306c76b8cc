//! Service Module
//!
//! Transport-independent RPC operations: blob streaming and last-commit
//! lookups.

mod blob;
mod commit;

use std::path::{Path, PathBuf};

pub use blob::{BlobService, ChannelSink, FrameSink, TransportError};
pub use commit::CommitService;

/// Location of the bare repository for `repo_uid` under `repos_root`.
pub fn repo_path(repos_root: &Path, repo_uid: &str) -> PathBuf {
    repos_root.join(format!("{repo_uid}.git"))
}
