//! Blob streaming
//!
//! Streams blob content to the caller as one header frame followed by
//! content frames of at most [`MAX_CHUNK_SIZE`] bytes. Memory use per request
//! is bounded by one chunk regardless of blob size.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::repo_path;
use crate::adapter::{BlobContent, GitAdapter};
use crate::error::{Result, RpcError};
use crate::models::{BlobFrame, BlobHeader, GetBlobRequest, MAX_CHUNK_SIZE};

// == Frame Sink ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Destination of the frames of one response. Frames are sent strictly one
/// at a time.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: BlobFrame) -> std::result::Result<(), TransportError>;
}

/// Sink feeding a bounded channel, read by the transport.
pub struct ChannelSink {
    tx: mpsc::Sender<BlobFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<BlobFrame>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: BlobFrame) -> std::result::Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError("response stream closed by receiver".to_string()))
    }
}

// == Content Guard ==
/// Owns a blob content stream and closes it exactly once when dropped.
struct ContentGuard(Box<dyn BlobContent>);

impl Deref for ContentGuard {
    type Target = Box<dyn BlobContent>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ContentGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for ContentGuard {
    fn drop(&mut self) {
        if let Err(err) = self.0.close() {
            warn!(error = %err, "failed to close blob content reader");
        }
    }
}

// == Blob Service ==
#[derive(Clone)]
pub struct BlobService {
    adapter: Arc<dyn GitAdapter>,
    repos_root: PathBuf,
}

impl BlobService {
    pub fn new(adapter: Arc<dyn GitAdapter>, repos_root: impl Into<PathBuf>) -> Self {
        Self {
            adapter,
            repos_root: repos_root.into(),
        }
    }

    // == Get Blob ==
    /// Streams the requested blob into `sink`.
    ///
    /// Validation and adapter failures return before any frame is sent.
    /// Cancellation of `ctx` is checked once per chunk, before each read; a
    /// read or send already in progress is not interrupted. Frames already
    /// sent stay sent.
    #[instrument(skip_all, fields(sha = %request.sha, size_limit = request.size_limit))]
    pub async fn get_blob<S>(
        &self,
        request: &GetBlobRequest,
        sink: &mut S,
        ctx: &CancellationToken,
    ) -> Result<()>
    where
        S: FrameSink + ?Sized,
    {
        let repo_uid = request.validate().map_err(RpcError::Validation)?;
        let repo_path = repo_path(&self.repos_root, repo_uid);

        let blob = self
            .adapter
            .get_blob(ctx, &repo_path, &request.sha, request.size_limit)
            .await
            .map_err(|e| RpcError::upstream(e, "failed to get blob"))?;
        let mut content = ContentGuard(blob.content);

        sink.send(BlobFrame::Header(BlobHeader {
            sha: request.sha.clone(),
            size: blob.size,
            content_size: blob.content_size,
        }))
        .await
        .map_err(|e| RpcError::Transport(format!("failed to send header: {e}")))?;

        let mut buffer = vec![0u8; MAX_CHUNK_SIZE];
        let mut sent: u64 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(RpcError::Cancelled(
                    "the context got cancelled while streaming the blob content".to_string(),
                ));
            }

            // Bytes read are always sent before end of stream is considered.
            let n = content
                .read(&mut buffer)
                .await
                .map_err(RpcError::from_read)?;
            if n == 0 {
                break;
            }

            sink.send(BlobFrame::Content(Bytes::copy_from_slice(&buffer[..n])))
                .await
                .map_err(|e| RpcError::Transport(format!("failed to send content: {e}")))?;
            sent += n as u64;
        }

        debug!(bytes = sent, "blob streamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Blob, Commit, InMemoryAdapter, ReaderContent};
    use crate::error::{ErrorKind, GitError};
    use crate::models::RepoBase;
    use proptest::prelude::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ROOT: &str = "/repos";

    /// Records every frame, optionally failing or cancelling at a given frame.
    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<BlobFrame>,
        fail_at: Option<usize>,
        cancel_after_content: Option<CancellationToken>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&mut self, frame: BlobFrame) -> std::result::Result<(), TransportError> {
            if self.fail_at == Some(self.frames.len()) {
                return Err(TransportError("connection reset".to_string()));
            }
            let is_content = !frame.is_header();
            self.frames.push(frame);
            if is_content {
                if let Some(ctx) = &self.cancel_after_content {
                    ctx.cancel();
                }
            }
            Ok(())
        }
    }

    /// Adapter handing out one prepared content stream.
    struct StreamAdapter {
        content: Mutex<Option<Box<dyn BlobContent>>>,
        size: i64,
    }

    #[async_trait]
    impl GitAdapter for StreamAdapter {
        async fn get_blob(
            &self,
            _ctx: &CancellationToken,
            _repo_path: &Path,
            sha: &str,
            _size_limit: i64,
        ) -> std::result::Result<Blob, GitError> {
            let content = self.content.lock().unwrap().take().expect("content already taken");
            Ok(Blob {
                sha: sha.to_string(),
                size: self.size,
                content_size: self.size,
                content,
            })
        }

        async fn get_latest_commit(
            &self,
            _ctx: &CancellationToken,
            _repo_path: &Path,
            _rev: &str,
            _tree_path: &str,
        ) -> std::result::Result<Commit, GitError> {
            Err(GitError::NotFound("no commits".to_string()))
        }
    }

    fn request(sha: &str, size_limit: i64) -> GetBlobRequest {
        GetBlobRequest {
            base: Some(RepoBase {
                repo_uid: "repo".to_string(),
            }),
            sha: sha.to_string(),
            size_limit,
        }
    }

    fn memory_service(data: Vec<u8>) -> (Arc<InMemoryAdapter>, BlobService) {
        let adapter = Arc::new(InMemoryAdapter::new());
        adapter.insert_blob(repo_path(Path::new(ROOT), "repo"), "sha1", data);
        let service = BlobService::new(adapter.clone(), ROOT);
        (adapter, service)
    }

    fn content_sizes(frames: &[BlobFrame]) -> Vec<usize> {
        frames.iter().skip(1).map(BlobFrame::content_len).collect()
    }

    #[tokio::test]
    async fn test_streams_header_then_chunks() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let (adapter, service) = memory_service(data.clone());
        let mut sink = RecordingSink::default();

        service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.frames[0],
            BlobFrame::Header(BlobHeader {
                sha: "sha1".to_string(),
                size: 40_000,
                content_size: 40_000,
            })
        );
        assert_eq!(content_sizes(&sink.frames), vec![16384, 16384, 7232]);

        let mut received = Vec::new();
        for frame in &sink.frames[1..] {
            match frame {
                BlobFrame::Content(bytes) => received.extend_from_slice(bytes),
                BlobFrame::Header(_) => panic!("second header frame"),
            }
        }
        assert_eq!(received, data);
        assert_eq!(adapter.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_size_limit_truncates_content() {
        let (_, service) = memory_service(vec![7u8; 40_000]);
        let mut sink = RecordingSink::default();

        service
            .get_blob(&request("sha1", 20_000), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        match &sink.frames[0] {
            BlobFrame::Header(header) => {
                assert_eq!(header.size, 40_000);
                assert_eq!(header.content_size, 20_000);
            }
            other => panic!("expected header, got {other:?}"),
        }
        assert_eq!(content_sizes(&sink.frames), vec![16384, 3616]);
    }

    #[tokio::test]
    async fn test_empty_blob_sends_only_header() {
        let (adapter, service) = memory_service(Vec::new());
        let mut sink = RecordingSink::default();

        service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.frames.len(), 1);
        assert!(sink.frames[0].is_header());
        assert_eq!(adapter.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_validation_failures_send_nothing() {
        let (adapter, service) = memory_service(vec![1, 2, 3]);
        let ctx = CancellationToken::new();

        let missing_base = GetBlobRequest {
            base: None,
            ..request("sha1", 0)
        };
        for bad in [missing_base, request("", 0)] {
            let mut sink = RecordingSink::default();
            let err = service.get_blob(&bad, &mut sink, &ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(sink.frames.is_empty());
        }
        assert_eq!(adapter.blob_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_blob_is_upstream_error() {
        let (_, service) = memory_service(vec![1]);
        let mut sink = RecordingSink::default();

        let err = service
            .get_blob(&request("missing", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RpcError::Upstream {
                source: GitError::NotFound(_),
                ..
            }
        ));
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_first_content_frame() {
        let (adapter, service) = memory_service(vec![0u8; 40_000]);
        let ctx = CancellationToken::new();
        let mut sink = RecordingSink {
            cancel_after_content: Some(ctx.clone()),
            ..Default::default()
        };

        let err = service
            .get_blob(&request("sha1", 0), &mut sink, &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(content_sizes(&sink.frames), vec![16384]);
        assert_eq!(adapter.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_header_send_failure_is_transport_error() {
        let (adapter, service) = memory_service(vec![1, 2, 3]);
        let mut sink = RecordingSink {
            fail_at: Some(0),
            ..Default::default()
        };

        let err = service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("failed to send header"));
        assert_eq!(adapter.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_content_send_failure_keeps_earlier_frames() {
        let (adapter, service) = memory_service(vec![0u8; 40_000]);
        let mut sink = RecordingSink {
            fail_at: Some(2),
            ..Default::default()
        };

        let err = service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(adapter.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_data_before_read_error_is_delivered() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let mock = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(GitError::Upstream("cat-file died".to_string()).into_io())
            .build();
        let content = ReaderContent::new(mock).on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let adapter = Arc::new(StreamAdapter {
            content: Mutex::new(Some(Box::new(content))),
            size: 100,
        });
        let service = BlobService::new(adapter, ROOT);
        let mut sink = RecordingSink::default();

        let err = service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            sink.frames[1],
            BlobFrame::Content(Bytes::from_static(b"partial"))
        );
        match err {
            RpcError::Upstream { source, .. } => {
                assert_eq!(source, GitError::Upstream("cat-file died".to_string()))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_change_outcome() {
        let content = ReaderContent::new(std::io::Cursor::new(b"abc".to_vec()))
            .on_close(|| Err(std::io::Error::other("already reaped")));
        let adapter = Arc::new(StreamAdapter {
            content: Mutex::new(Some(Box::new(content))),
            size: 3,
        });
        let service = BlobService::new(adapter, ROOT);
        let mut sink = RecordingSink::default();

        let result = service
            .get_blob(&request("sha1", 0), &mut sink, &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert_eq!(content_sizes(&sink.frames), vec![3]);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);

        let result = sink.send(BlobFrame::Content(Bytes::from_static(b"x"))).await;
        assert!(result.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // Content frames are non-empty, bounded, and add up to the declared
        // content size.
        #[test]
        fn prop_chunks_cover_content(size in 0usize..70_000, size_limit in -1i64..80_000) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let frames = rt.block_on(async {
                let (_, service) = memory_service(vec![3u8; size]);
                let mut sink = RecordingSink::default();
                service
                    .get_blob(&request("sha1", size_limit), &mut sink, &CancellationToken::new())
                    .await
                    .unwrap();
                sink.frames
            });

            let declared = match &frames[0] {
                BlobFrame::Header(header) => header.content_size,
                other => panic!("expected header, got {other:?}"),
            };
            prop_assert_eq!(frames.iter().filter(|f| f.is_header()).count(), 1);

            let sizes = content_sizes(&frames);
            prop_assert!(sizes.iter().all(|&n| n > 0 && n <= MAX_CHUNK_SIZE));
            prop_assert_eq!(sizes.iter().sum::<usize>() as i64, declared);
            prop_assert_eq!(declared, crate::adapter::content_size(size as i64, size_limit));
        }
    }
}
