//! TTL Cleanup Task
//!
//! Background task that periodically removes expired entries from the local
//! last-commit cache. Expired entries are never served either way; the sweep
//! only bounds memory held by keys nobody asks for again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::wiring::LastCommitCache;

/// Spawns a background task that purges expired cache entries every
/// `cleanup_interval_secs` seconds.
///
/// Abort the returned handle during graceful shutdown.
pub fn spawn_cleanup_task(cache: Arc<LastCommitCache>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting cache cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();
            if removed > 0 {
                info!(removed, "cache cleanup removed expired entries");
            } else {
                debug!("cache cleanup found no expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Commit, CommitEntryKey, Identity, InMemoryAdapter, Signature};
    use crate::cache::Cache;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    fn seeded_cache(ttl: Duration) -> (Arc<LastCommitCache>, CommitEntryKey) {
        let adapter = Arc::new(InMemoryAdapter::new());
        let signature = Signature {
            identity: Identity {
                name: "Jane".to_string(),
                email: "jane@example.com".to_string(),
            },
            when: chrono::DateTime::from_timestamp(0, 0).unwrap(),
        };
        adapter.insert_commit(
            "/repos/r.git",
            "main",
            "",
            Commit {
                sha: "c1".to_string(),
                title: "init".to_string(),
                message: "init".to_string(),
                author: signature.clone(),
                committer: signature,
            },
        );
        let key = CommitEntryKey {
            repo_path: PathBuf::from("/repos/r.git"),
            commit_sha: "main".to_string(),
            path: String::new(),
        };
        let cache = LastCommitCache::new(Cache::local(ttl), adapter);
        (Arc::new(cache), key)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_removes_expired_entries() {
        let (cache, key) = seeded_cache(Duration::from_secs(1));
        cache.get(&CancellationToken::new(), key).await.unwrap();
        assert_eq!(cache.stats().total_entries, 1);

        let handle = spawn_cleanup_task(cache.clone(), 2);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(cache.stats().total_entries, 0);
        assert_eq!(cache.stats().evictions, 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_preserves_valid_entries() {
        let (cache, key) = seeded_cache(Duration::from_secs(3600));
        cache.get(&CancellationToken::new(), key).await.unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.stats().total_entries, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let (cache, _) = seeded_cache(Duration::from_secs(60));
        let handle = spawn_cleanup_task(cache, 1);

        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
