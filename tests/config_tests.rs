use std::env;
use std::time::Duration;

use upload_tracker::config::{Config, StorageBackend};

// helper to clear env vars
fn clear_env() {
    for key in [
        "UPLOAD_HOST",
        "UPLOAD_PORT",
        "WORKER_THREADS",
        "UPLOAD_DIR",
        "MAX_REQUEST_SIZE",
        "PER_CHUNK_DELAY_MS",
        "CACHE_TTL_SECS",
        "CACHE_REQUEST_SIZE",
        "STORAGE_BACKEND",
        "LISTENER_GRACE_SECS",
        "CORS_ORIGINS",
    ] {
        env::remove_var(key);
    }
}

#[test]
fn test_storage_backend_parsing() {
    assert_eq!("disk".parse::<StorageBackend>(), Ok(StorageBackend::Disk));
    assert_eq!(" Cache ".parse::<StorageBackend>(), Ok(StorageBackend::Cache));
    assert!("s3".parse::<StorageBackend>().is_err());
}

#[test]
fn test_disk_backend_keeps_limits() {
    let config = Config {
        max_request_size: 1 << 30,
        per_chunk_delay: Duration::from_millis(5),
        ..Config::default()
    }
    .with_backend_constraints();
    assert_eq!(config.max_request_size, 1 << 30);
    assert_eq!(config.per_chunk_delay, Duration::from_millis(5));
}

#[test]
fn test_cache_backend_constraints() {
    let config = Config {
        storage_backend: StorageBackend::Cache,
        max_request_size: 1 << 30,
        per_chunk_delay: Duration::from_millis(200),
        cache_request_size: 1024,
        ..Config::default()
    }
    .with_backend_constraints();
    assert_eq!(config.max_request_size, 1024);
    // a longer delay than the minimum is kept
    assert_eq!(config.per_chunk_delay, Duration::from_millis(200));
}

#[test]
fn test_config_behavior() {
    // Run these sequentially to avoid race conditions with environment variables

    // 1. Test Defaults
    clear_env();

    let config = Config::from_env();

    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 4850);
    assert_eq!(config.worker_threads, 8);
    assert_eq!(config.upload_dir.to_str().unwrap(), "./uploads");
    assert_eq!(config.max_request_size, 10 * 1024 * 1024);
    assert_eq!(config.per_chunk_delay, Duration::ZERO);
    assert_eq!(config.cache_ttl, Duration::from_secs(3600));
    assert_eq!(config.cache_request_size, 512 * 1024);
    assert_eq!(config.storage_backend, StorageBackend::Disk);
    assert_eq!(config.cors_origins.len(), 2);

    // 2. Test From Env
    clear_env();

    env::set_var("UPLOAD_PORT", "9090");
    env::set_var("UPLOAD_DIR", "/tmp/test_uploads");
    env::set_var("STORAGE_BACKEND", "cache");
    env::set_var("PER_CHUNK_DELAY_MS", "10");
    env::set_var("CACHE_TTL_SECS", "60");
    env::set_var("LISTENER_GRACE_SECS", "5");
    env::set_var("CORS_ORIGINS", "https://a.example, https://b.example,");

    let config = Config::from_env();

    assert_eq!(config.port, 9090);
    assert_eq!(config.upload_dir.to_str().unwrap(), "/tmp/test_uploads");
    assert_eq!(config.storage_backend, StorageBackend::Cache);
    assert_eq!(config.max_request_size, 512 * 1024);
    assert_eq!(config.per_chunk_delay, Duration::from_millis(50));
    assert_eq!(config.cache_ttl, Duration::from_secs(60));
    assert_eq!(config.listener_grace_period, Duration::from_secs(5));
    assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);

    // 3. Garbage falls back to defaults
    clear_env();

    env::set_var("UPLOAD_PORT", "not-a-port");
    env::set_var("STORAGE_BACKEND", "tape");

    let config = Config::from_env();
    assert_eq!(config.port, 4850);
    assert_eq!(config.storage_backend, StorageBackend::Disk);

    // Cleanup
    clear_env();
}
