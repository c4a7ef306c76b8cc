//! API Handlers
//!
//! HTTP request handlers for each RPC endpoint.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::adapter::{Commit, GitAdapter};
use crate::codec::{encode_frame, FRAMES_CONTENT_TYPE};
use crate::error::{Result, RpcError};
use crate::models::{BlobFrame, GetBlobRequest, GetLastCommitRequest, HealthResponse, StatsResponse};
use crate::service::{BlobService, ChannelSink, CommitService};
use crate::wiring::LastCommitCache;

/// Frames buffered between the streaming task and the response body.
const FRAME_BUFFER: usize = 4;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub blob_service: BlobService,
    pub commit_service: CommitService,
    pub last_commit_cache: Arc<LastCommitCache>,
}

impl AppState {
    pub fn new(
        adapter: Arc<dyn GitAdapter>,
        last_commit_cache: Arc<LastCommitCache>,
        repos_root: impl Into<PathBuf>,
    ) -> Self {
        let repos_root = repos_root.into();
        Self {
            blob_service: BlobService::new(adapter, repos_root.clone()),
            commit_service: CommitService::new(Arc::clone(&last_commit_cache), repos_root),
            last_commit_cache,
        }
    }
}

type StreamTask = JoinHandle<Result<()>>;

/// Handler for POST /v1/blob
///
/// Streams the blob as framed binary: one header frame, then content frames.
/// Errors raised before the first frame become a JSON error response. Later
/// errors abort the body.
pub async fn get_blob_handler(
    State(state): State<AppState>,
    Json(request): Json<GetBlobRequest>,
) -> Result<Response> {
    let ctx = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(FRAME_BUFFER);

    let service = state.blob_service.clone();
    let task_ctx = ctx.clone();
    let task: StreamTask = tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        service.get_blob(&request, &mut sink, &task_ctx).await
    });
    // Cancels the stream when the client goes away and the body is dropped.
    let cancel_on_drop = ctx.drop_guard();

    let Some(first) = rx.recv().await else {
        return Err(stream_error(task.await));
    };

    Ok((
        [(header::CONTENT_TYPE, FRAMES_CONTENT_TYPE)],
        frame_body(first, rx, task, cancel_on_drop),
    )
        .into_response())
}

/// Builds the response body from the frames the streaming task produces.
///
/// The body owns `cancel_on_drop`, so dropping it cancels the stream.
fn frame_body(
    first: BlobFrame,
    rx: mpsc::Receiver<BlobFrame>,
    task: StreamTask,
    cancel_on_drop: DropGuard,
) -> Body {
    let body = BodyState {
        pending: Some(first),
        rx,
        task: Some(task),
        _cancel_on_drop: cancel_on_drop,
    };
    let stream = futures::stream::unfold(body, |mut body| async move {
        let frame = match body.pending.take() {
            Some(frame) => Some(frame),
            None => body.rx.recv().await,
        };
        if let Some(frame) = frame {
            let encoded = encode_frame(&frame).map_err(io::Error::other);
            return Some((encoded, body));
        }

        let Some(task) = body.task.take() else {
            return None;
        };
        match task.await {
            Ok(Ok(())) => None,
            joined => {
                let err = stream_error(joined);
                warn!(error = %err, "blob stream aborted");
                Some((Err(io::Error::other(err.to_string())), body))
            }
        }
    });

    Body::from_stream(stream)
}

struct BodyState {
    pending: Option<BlobFrame>,
    rx: mpsc::Receiver<BlobFrame>,
    task: Option<StreamTask>,
    _cancel_on_drop: DropGuard,
}

fn stream_error(joined: std::result::Result<Result<()>, JoinError>) -> RpcError {
    match joined {
        Ok(Err(err)) => err,
        Ok(Ok(())) => RpcError::Internal("blob stream ended without a header".to_string()),
        Err(err) => RpcError::Internal(format!("blob stream task failed: {err}")),
    }
}

/// Handler for GET /v1/last-commit
pub async fn last_commit_handler(
    State(state): State<AppState>,
    Query(request): Query<GetLastCommitRequest>,
) -> Result<Json<Commit>> {
    let ctx = CancellationToken::new();
    let _cancel_on_drop = ctx.clone().drop_guard();

    let commit = state.commit_service.get_last_commit(&request, &ctx).await?;
    Ok(Json(commit))
}

/// Handler for GET /stats
///
/// Returns last-commit cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = &state.last_commit_cache;
    Json(StatsResponse::new(cache.mode().to_string(), &cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
