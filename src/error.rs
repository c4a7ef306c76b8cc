//! Error types for the git RPC server
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::StoreError;
use crate::models::ErrorResponse;

// == Git Error Enum ==
/// Errors reported by the git adapter.
///
/// `Clone` so that one loader outcome can be handed to every waiter of a
/// cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GitError {
    /// Object, reference or repository does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Arguments rejected by git
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller context ended before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Any other git plumbing failure
    #[error("git failure: {0}")]
    Upstream(String),

    /// Shared cache store unavailable or misbehaving
    #[error("cache store failure: {0}")]
    Store(String),
}

impl From<StoreError> for GitError {
    fn from(err: StoreError) -> Self {
        GitError::Store(err.to_string())
    }
}

impl GitError {
    /// Wraps the error into an `io::Error` so it can travel through an
    /// `AsyncRead` content stream and be recovered on the other side.
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// Recovers a `GitError` previously wrapped with [`GitError::into_io`].
    pub fn from_io(err: &std::io::Error) -> Option<GitError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<GitError>())
            .cloned()
    }
}

// == Error Kind ==
/// Coarse classification of [`RpcError`] callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Upstream,
    Cancelled,
    Transport,
    Internal,
}

// == RPC Error Enum ==
/// Unified error type for RPC operations.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Malformed or incomplete request, detected before any side effect
    #[error("invalid request: {0}")]
    Validation(String),

    /// Adapter failure, with the original cause preserved
    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: GitError,
    },

    /// Caller context ended mid-operation
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Failed to hand a frame to the transport
    #[error("transport failure: {0}")]
    Transport(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Wraps an adapter error with a description of what was attempted.
    ///
    /// A cancelled adapter call stays a cancellation.
    pub fn upstream(source: GitError, context: impl Into<String>) -> Self {
        let context = context.into();
        match source {
            GitError::Cancelled => RpcError::Cancelled(context),
            source => RpcError::Upstream { context, source },
        }
    }

    /// Converts an error raised while reading blob content.
    ///
    /// Errors that originate from the adapter keep their semantics, anything
    /// else is internal.
    pub fn from_read(err: std::io::Error) -> Self {
        match GitError::from_io(&err) {
            Some(source) => RpcError::upstream(source, "failed to read blob content"),
            None => RpcError::Internal(format!("failed to read blob content: {err}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Validation(_) => ErrorKind::Validation,
            RpcError::Upstream { .. } => ErrorKind::Upstream,
            RpcError::Cancelled(_) => ErrorKind::Cancelled,
            RpcError::Transport(_) => ErrorKind::Transport,
            RpcError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RpcError::Validation(_) => StatusCode::BAD_REQUEST,
            RpcError::Upstream {
                source: GitError::NotFound(_),
                ..
            } => StatusCode::NOT_FOUND,
            RpcError::Upstream {
                source: GitError::InvalidArgument(_),
                ..
            } => StatusCode::BAD_REQUEST,
            RpcError::Cancelled(_) => {
                // 499 Client Closed Request
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            RpcError::Upstream { .. } | RpcError::Transport(_) | RpcError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_keeps_source() {
        let err = RpcError::upstream(GitError::NotFound("abc".to_string()), "failed to get blob");

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.to_string(), "failed to get blob: not found: abc");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upstream_cancelled_becomes_cancellation() {
        let err = RpcError::upstream(GitError::Cancelled, "failed to get blob");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_git_error_survives_io_round_trip() {
        let io = GitError::Upstream("pipe closed".to_string()).into_io();
        let err = RpcError::from_read(io);

        match err {
            RpcError::Upstream { source, .. } => {
                assert_eq!(source, GitError::Upstream("pipe closed".to_string()))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_is_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(RpcError::from_read(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RpcError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RpcError::Cancelled("x".into()).status_code().as_u16(), 499);
        assert_eq!(
            RpcError::Transport("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
