//! Adapter Module
//!
//! The contract this server consumes from the underlying git plumbing, plus
//! the bindings shipped with it.
//!
//! Adapters must be safe to call concurrently for different repositories.
//! Deduplicating concurrent work on the same key is the cache's job.

mod cli;
mod memory;

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheKey;
use crate::error::GitError;

pub use cli::CliGitAdapter;
pub use memory::InMemoryAdapter;

// == Blob ==
/// Blob metadata plus a readable content stream.
pub struct Blob {
    /// Content hash
    pub sha: String,
    /// Full size of the object in bytes
    pub size: i64,
    /// Number of bytes the content stream yields, after truncation
    pub content_size: i64,
    /// Content stream, must be released with [`BlobContent::close`]
    pub content: Box<dyn BlobContent>,
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("sha", &self.sha)
            .field("size", &self.size)
            .field("content_size", &self.content_size)
            .finish_non_exhaustive()
    }
}

/// Readable blob content that holds an underlying resource (a process, a
/// file handle) until closed.
pub trait BlobContent: AsyncRead + Send + Unpin {
    fn close(&mut self) -> std::io::Result<()>;
}

/// Effective number of bytes served for a blob of `size` under `size_limit`.
///
/// A non-positive limit means no truncation.
pub fn content_size(size: i64, size_limit: i64) -> i64 {
    if size_limit > 0 && size_limit < size {
        size_limit
    } else {
        size
    }
}

// == Commit ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub identity: Identity,
    pub when: DateTime<Utc>,
}

/// A commit as returned by last-commit lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub title: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

// == Commit Entry Key ==
/// Identifies one last-commit computation: which commit last touched `path`
/// in the repository at `repo_path` as of `commit_sha`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitEntryKey {
    pub repo_path: PathBuf,
    pub commit_sha: String,
    pub path: String,
}

impl CacheKey for CommitEntryKey {
    fn store_key(&self) -> String {
        format!(
            "last_commit:{}:{}:{}",
            self.repo_path.display(),
            self.commit_sha,
            self.path
        )
    }
}

// == Git Adapter ==
/// Git plumbing operations the RPC layer depends on.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Returns blob metadata and a content stream truncated to `size_limit`
    /// bytes when positive. Unknown hashes yield [`GitError::NotFound`].
    async fn get_blob(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        sha: &str,
        size_limit: i64,
    ) -> Result<Blob, GitError>;

    /// Returns the most recent commit reachable from `rev` that modified
    /// `tree_path`. An empty path means the repository root.
    async fn get_latest_commit(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        rev: &str,
        tree_path: &str,
    ) -> Result<Commit, GitError>;
}

// == Reader Content ==
/// [`BlobContent`] over any async reader, with an optional close hook.
pub struct ReaderContent<R> {
    reader: R,
    on_close: Option<Box<dyn FnMut() -> std::io::Result<()> + Send>>,
}

impl<R> ReaderContent<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            on_close: None,
        }
    }

    /// Runs `hook` when the content is closed.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> std::io::Result<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl<R> AsyncRead for ReaderContent<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R> BlobContent for ReaderContent<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn close(&mut self) -> std::io::Result<()> {
        match self.on_close.as_mut() {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}
