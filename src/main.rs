//! gitrpc - Git object RPC service

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitrpc::adapter::{CliGitAdapter, GitAdapter};
use gitrpc::api::{create_router, AppState};
use gitrpc::config::{CacheMode, Config};
use gitrpc::spawn_cleanup_task;
use gitrpc::wiring::{provide_last_commit_cache, provide_shared_store};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the shared cache store when configured
/// 4. Build the git adapter, last-commit cache and services
/// 5. Start the cleanup task for the local cache backend
/// 6. Serve HTTP until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitrpc=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gitrpc server");

    let config = Config::from_env();
    info!(
        port = config.server_port,
        repos_root = %config.repos_root.display(),
        cache_mode = %config.last_commit_cache.mode,
        cache_duration_secs = config.last_commit_cache.duration_secs,
        "configuration loaded"
    );

    let store = provide_shared_store(&config).await;
    let adapter: Arc<dyn GitAdapter> = Arc::new(CliGitAdapter::new());
    let cache = Arc::new(provide_last_commit_cache(&config, store, Arc::clone(&adapter)));

    let cleanup_handle = (cache.mode() == CacheMode::Local).then(|| {
        spawn_cleanup_task(Arc::clone(&cache), config.last_commit_cache.cleanup_interval)
    });

    let state = AppState::new(adapter, cache, config.repos_root.clone());
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops the cleanup task.
async fn shutdown_signal(cleanup_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
