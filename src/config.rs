use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::cache::{DEFAULT_CACHE_TTL, DEFAULT_REQUEST_SIZE};

/// the smallest per-chunk delay allowed with the cache backend
pub const MIN_CACHE_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// where uploaded items are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Disk,
    Cache,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(StorageBackend::Disk),
            "cache" | "memcache" => Ok(StorageBackend::Cache),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// server address
    pub host: String,
    /// server port
    pub port: u16,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// directory for the disk backend
    pub upload_dir: PathBuf,
    /// requests declaring (or streaming) more than this are rejected
    pub max_request_size: u64,
    /// artificial throttle applied after every chunk
    pub per_chunk_delay: Duration,
    /// expiry of cache-backed items and listener snapshots
    pub cache_ttl: Duration,
    /// buffer ceiling of a cache-backed item
    pub cache_request_size: usize,
    pub storage_backend: StorageBackend,
    /// how long a finished listener stays registered for a final poll
    pub listener_grace_period: Duration,
    /// cors allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4850,
            worker_threads: 8,
            upload_dir: PathBuf::from("./uploads"),
            max_request_size: 10 * 1024 * 1024,
            per_chunk_delay: Duration::ZERO,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_request_size: DEFAULT_REQUEST_SIZE,
            storage_backend: StorageBackend::Disk,
            listener_grace_period: Duration::from_secs(30),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage_backend = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>().unwrap_or_else(|e| {
                tracing::warn!("{}, falling back to disk", e);
                StorageBackend::Disk
            }),
            Err(_) => defaults.storage_backend,
        };

        // parse cors origins
        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            host: std::env::var("UPLOAD_HOST").unwrap_or(defaults.host),
            port: env_parse("UPLOAD_PORT").unwrap_or(defaults.port),
            worker_threads: env_parse("WORKER_THREADS").unwrap_or(defaults.worker_threads),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_request_size: env_parse("MAX_REQUEST_SIZE").unwrap_or(defaults.max_request_size),
            per_chunk_delay: env_parse("PER_CHUNK_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.per_chunk_delay),
            cache_ttl: env_parse("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_request_size: env_parse("CACHE_REQUEST_SIZE").unwrap_or(defaults.cache_request_size),
            storage_backend,
            listener_grace_period: env_parse("LISTENER_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.listener_grace_period),
            cors_origins,
        }
        .with_backend_constraints()
    }

    /// tighten limits the cache backend cannot honor
    ///
    /// a cache item can never outgrow its buffer because the whole request is
    /// capped at the buffer size, and uploads are throttled to at least 50ms per chunk.
    pub fn with_backend_constraints(mut self) -> Self {
        if self.storage_backend == StorageBackend::Cache {
            let ceiling = self.cache_request_size as u64;
            if self.max_request_size > ceiling {
                tracing::debug!(
                    "Lowering max request size from {} to {} bytes for the cache backend",
                    self.max_request_size,
                    ceiling
                );
                self.max_request_size = ceiling;
            }
            self.per_chunk_delay = self.per_chunk_delay.max(MIN_CACHE_CHUNK_DELAY);
        }
        self
    }
}
