//! Git CLI adapter using [`tokio::process::Command`].
//!
//! Shells out to the system `git` binary against bare repositories on local
//! disk. Blob content is streamed straight from `git cat-file` stdout.

use std::path::Path;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{content_size, Blob, BlobContent, Commit, GitAdapter, Identity, Signature};
use crate::error::GitError;

/// Separator between `git log` format fields.
const FIELD_SEPARATOR: char = '\u{1f}';

const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%cn%x1f%ce%x1f%cI%x1f%B";

#[derive(Debug, Clone, Default)]
pub struct CliGitAdapter {
    git_binary: String,
}

impl CliGitAdapter {
    pub fn new() -> Self {
        Self {
            git_binary: "git".to_string(),
        }
    }

    /// Uses `binary` instead of the `git` found on `PATH`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            git_binary: binary.into(),
        }
    }

    fn command(&self, repo_path: &Path) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        cmd.arg("-C").arg(repo_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs `cmd` to completion unless `ctx` is cancelled first.
    async fn run(&self, ctx: &CancellationToken, mut cmd: Command) -> Result<Output, GitError> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tokio::select! {
            _ = ctx.cancelled() => Err(GitError::Cancelled),
            output = cmd.output() => {
                output.map_err(|e| GitError::Upstream(format!("failed to spawn git: {e}")))
            }
        }
    }
}

fn ensure_repo(repo_path: &Path) -> Result<(), GitError> {
    if repo_path.is_dir() {
        Ok(())
    } else {
        Err(GitError::NotFound(format!(
            "repository {} does not exist",
            repo_path.display()
        )))
    }
}

/// Refuses revisions git would parse as options.
fn ensure_revision(rev: &str) -> Result<(), GitError> {
    if rev.is_empty() || rev.starts_with('-') {
        Err(GitError::InvalidArgument(format!("invalid revision '{rev}'")))
    } else {
        Ok(())
    }
}

/// Maps a failed git invocation onto an adapter error.
fn command_error(what: &str, output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let missing = [
        "Not a valid object name",
        "could not get object info",
        "unknown revision",
        "bad revision",
        "not a valid object",
    ];
    if missing.iter().any(|marker| stderr.contains(marker)) {
        GitError::NotFound(format!("{what}: {stderr}"))
    } else {
        GitError::Upstream(format!(
            "{what} failed (status {}): {stderr}",
            output.status
        ))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, GitError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GitError::Upstream(format!("invalid commit time '{raw}': {e}")))
}

/// Parses one commit printed with [`LOG_FORMAT`].
fn parse_commit(stdout: &str) -> Result<Commit, GitError> {
    let fields: Vec<&str> = stdout.splitn(8, FIELD_SEPARATOR).collect();
    let [sha, author_name, author_email, author_when, committer_name, committer_email, committer_when, body] =
        fields.as_slice()
    else {
        return Err(GitError::Upstream(format!(
            "unexpected git log output: {stdout:?}"
        )));
    };

    let message = body.trim_end().to_string();
    let title = message.lines().next().unwrap_or_default().to_string();

    Ok(Commit {
        sha: sha.trim().to_string(),
        title,
        message,
        author: Signature {
            identity: Identity {
                name: author_name.to_string(),
                email: author_email.to_string(),
            },
            when: parse_time(author_when)?,
        },
        committer: Signature {
            identity: Identity {
                name: committer_name.to_string(),
                email: committer_email.to_string(),
            },
            when: parse_time(committer_when)?,
        },
    })
}

// == Process Content ==
/// Blob content read from a running `git cat-file blob`.
struct ProcessContent {
    stdout: Take<ChildStdout>,
    child: Child,
}

impl AsyncRead for ProcessContent {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl BlobContent for ProcessContent {
    /// Stops the process if it has not exited, e.g. when the content was
    /// truncated or the caller gave up early.
    fn close(&mut self) -> std::io::Result<()> {
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => self.child.start_kill(),
        }
    }
}

#[async_trait]
impl GitAdapter for CliGitAdapter {
    #[instrument(skip(self, ctx), fields(repo = %repo_path.display()))]
    async fn get_blob(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        sha: &str,
        size_limit: i64,
    ) -> Result<Blob, GitError> {
        ensure_repo(repo_path)?;
        ensure_revision(sha)?;

        let mut cmd = self.command(repo_path);
        cmd.args(["cat-file", "-t", "--end-of-options", sha]);
        let output = self.run(ctx, cmd).await?;
        if !output.status.success() {
            return Err(command_error("git cat-file -t", &output));
        }
        let kind = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if kind != "blob" {
            return Err(GitError::InvalidArgument(format!(
                "object {sha} is a {kind}, not a blob"
            )));
        }

        let mut cmd = self.command(repo_path);
        cmd.args(["cat-file", "-s", "--end-of-options", sha]);
        let output = self.run(ctx, cmd).await?;
        if !output.status.success() {
            return Err(command_error("git cat-file -s", &output));
        }
        let size: i64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|e| GitError::Upstream(format!("invalid blob size: {e}")))?;
        let content_size = content_size(size, size_limit);

        let mut cmd = self.command(repo_path);
        cmd.args(["cat-file", "blob", "--end-of-options", sha]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| GitError::Upstream(format!("failed to spawn git cat-file: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GitError::Upstream("git cat-file stdout not captured".to_string()))?;

        debug!(size, content_size, "streaming blob from git cat-file");

        Ok(Blob {
            sha: sha.to_string(),
            size,
            content_size,
            content: Box::new(ProcessContent {
                stdout: stdout.take(content_size as u64),
                child,
            }),
        })
    }

    #[instrument(skip(self, ctx), fields(repo = %repo_path.display()))]
    async fn get_latest_commit(
        &self,
        ctx: &CancellationToken,
        repo_path: &Path,
        rev: &str,
        tree_path: &str,
    ) -> Result<Commit, GitError> {
        ensure_repo(repo_path)?;
        ensure_revision(rev)?;

        let mut cmd = self.command(repo_path);
        cmd.args(["log", "-1", LOG_FORMAT, "--end-of-options", rev, "--"]);
        if !tree_path.is_empty() {
            cmd.arg(tree_path);
        }
        let output = self.run(ctx, cmd).await?;
        if !output.status.success() {
            return Err(command_error("git log", &output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(GitError::NotFound(format!(
                "no commit touches '{tree_path}' at {rev}"
            )));
        }
        parse_commit(&stdout)
    }
}
