//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

// == Cache Mode ==
/// Which last-commit cache backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// No caching, every lookup hits git
    Disabled,
    /// In-process table
    #[default]
    Local,
    /// KeyDB / Redis shared between server processes
    Shared,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(CacheMode::Disabled),
            "local" | "inmemory" => Ok(CacheMode::Local),
            "shared" | "redis" => Ok(CacheMode::Shared),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::Disabled => "disabled",
            CacheMode::Local => "local",
            CacheMode::Shared => "shared",
        };
        f.write_str(name)
    }
}

// == Cache Config ==
/// Last-commit cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Requested backend
    pub mode: CacheMode,
    /// Entry time-to-live in seconds
    pub duration_secs: u64,
    /// Interval in seconds between sweeps of expired local entries
    pub cleanup_interval: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Local,
            duration_secs: 12 * 60 * 60,
            cleanup_interval: 60,
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Directory holding the bare repositories
    pub repos_root: PathBuf,
    /// Last-commit cache settings
    pub last_commit_cache: CacheConfig,
    /// KeyDB / Redis endpoint for the shared cache, e.g. `redis://keydb:6379`
    pub redis_endpoint: Option<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `GITRPC_REPOS_ROOT` - Repository root directory (default: ./repos)
    /// - `GITRPC_LAST_COMMIT_CACHE_MODE` - disabled | local | shared (default: local)
    /// - `GITRPC_LAST_COMMIT_CACHE_DURATION` - Entry TTL in seconds (default: 43200)
    /// - `GITRPC_LAST_COMMIT_CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `GITRPC_REDIS_ENDPOINT` - Shared cache endpoint (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mode = match env::var("GITRPC_LAST_COMMIT_CACHE_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|err| {
                warn!("{}, falling back to {}", err, CacheMode::default());
                CacheMode::default()
            }),
            Err(_) => defaults.last_commit_cache.mode,
        };

        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            repos_root: env::var("GITRPC_REPOS_ROOT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.repos_root),
            last_commit_cache: CacheConfig {
                mode,
                duration_secs: env::var("GITRPC_LAST_COMMIT_CACHE_DURATION")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.last_commit_cache.duration_secs),
                cleanup_interval: env::var("GITRPC_LAST_COMMIT_CACHE_CLEANUP_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.last_commit_cache.cleanup_interval),
            },
            redis_endpoint: env::var("GITRPC_REDIS_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            repos_root: PathBuf::from("./repos"),
            last_commit_cache: CacheConfig::default(),
            redis_endpoint: None,
        }
    }
}
