//! gitrpc - Git object RPC service
//!
//! Streams blobs as framed binary and serves last-commit lookups through a
//! single-flight TTL cache with disabled, local and shared backends.

pub mod adapter;
pub mod api;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod tasks;
pub mod wiring;

pub use api::AppState;
pub use config::Config;
pub use tasks::spawn_cleanup_task;
pub use wiring::LastCommitCache;
