//! In-memory adapter
//!
//! Serves blobs and commits from maps. Counts calls and stream releases so
//! callers can observe caching and cleanup behaviour.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::{content_size, Blob, Commit, GitAdapter, ReaderContent};
use crate::cache::lock;
use crate::error::GitError;

type CommitKey = (PathBuf, String, String);

#[derive(Default)]
pub struct InMemoryAdapter {
    blobs: Mutex<HashMap<(PathBuf, String), Arc<Vec<u8>>>>,
    commits: Mutex<HashMap<CommitKey, Commit>>,
    commit_delay: Option<Duration>,
    blob_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    closed_streams: Arc<AtomicUsize>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every last-commit lookup take `delay`.
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    pub fn insert_blob(&self, repo_path: impl Into<PathBuf>, sha: &str, data: Vec<u8>) {
        lock(&self.blobs).insert((repo_path.into(), sha.to_string()), Arc::new(data));
    }

    pub fn insert_commit(
        &self,
        repo_path: impl Into<PathBuf>,
        rev: &str,
        tree_path: &str,
        commit: Commit,
    ) {
        lock(&self.commits).insert(
            (repo_path.into(), rev.to_string(), tree_path.to_string()),
            commit,
        );
    }

    pub fn blob_calls(&self) -> usize {
        self.blob_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Number of blob content streams released so far.
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitAdapter for InMemoryAdapter {
    async fn get_blob(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        sha: &str,
        size_limit: i64,
    ) -> Result<Blob, GitError> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        if ctx.is_cancelled() {
            return Err(GitError::Cancelled);
        }

        let data = lock(&self.blobs)
            .get(&(repo_path.to_path_buf(), sha.to_string()))
            .cloned()
            .ok_or_else(|| GitError::NotFound(format!("blob {sha}")))?;

        let size = data.len() as i64;
        let content_size = content_size(size, size_limit);
        let closed = Arc::clone(&self.closed_streams);
        let reader = std::io::Cursor::new(data.as_ref().clone()).take(content_size as u64);
        let content = ReaderContent::new(reader).on_close(move || {
            closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        Ok(Blob {
            sha: sha.to_string(),
            size,
            content_size,
            content: Box::new(content),
        })
    }

    async fn get_latest_commit(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        rev: &str,
        tree_path: &str,
    ) -> Result<Commit, GitError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.commit_delay {
            tokio::select! {
                _ = ctx.cancelled() => return Err(GitError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        } else if ctx.is_cancelled() {
            return Err(GitError::Cancelled);
        }

        lock(&self.commits)
            .get(&(repo_path.to_path_buf(), rev.to_string(), tree_path.to_string()))
            .cloned()
            .ok_or_else(|| GitError::NotFound(format!("no commit for '{tree_path}' at {rev}")))
    }
}
