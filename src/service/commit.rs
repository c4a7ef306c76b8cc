//! Last-commit lookups, read through the last-commit cache.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::repo_path;
use crate::adapter::{Commit, CommitEntryKey};
use crate::error::{Result, RpcError};
use crate::models::GetLastCommitRequest;
use crate::wiring::LastCommitCache;

#[derive(Clone)]
pub struct CommitService {
    cache: Arc<LastCommitCache>,
    repos_root: PathBuf,
}

impl CommitService {
    pub fn new(cache: Arc<LastCommitCache>, repos_root: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            repos_root: repos_root.into(),
        }
    }

    /// Returns the commit that last modified `request.path` as of `request.git_ref`.
    #[instrument(skip_all, fields(git_ref = %request.git_ref, path = %request.path))]
    pub async fn get_last_commit(
        &self,
        request: &GetLastCommitRequest,
        ctx: &CancellationToken,
    ) -> Result<Commit> {
        let repo_uid = request.validate().map_err(RpcError::Validation)?;

        let key = CommitEntryKey {
            repo_path: repo_path(&self.repos_root, repo_uid),
            commit_sha: request.git_ref.clone(),
            path: request.path.trim_matches('/').to_string(),
        };

        self.cache
            .get(ctx, key)
            .await
            .map_err(|e| RpcError::upstream(e, "failed to get last commit"))
    }
}
