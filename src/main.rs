use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use upload_tracker::config::{Config, StorageBackend};
use upload_tracker::state::AppState;
use upload_tracker::server::{build_router, print_startup_banner, spawn_cache_janitor, start_server};

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    // initialize tracing before config so its warnings are visible
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        if config.storage_backend == StorageBackend::Disk && !config.upload_dir.exists() {
            std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload directory");
            tracing::info!("Created upload directory at: {:?}", config.upload_dir);
        }

        let state = Arc::new(AppState::from_config(&config));
        spawn_cache_janitor(state.cache.clone(), Duration::from_secs(60));

        let app = build_router(state, &config);
        let addr = SocketAddr::from((
            config.host.parse::<std::net::IpAddr>()
                .expect("Invalid UPLOAD_HOST"),
            config.port,
        ));

        print_startup_banner(&config);
        start_server(app, addr).await;
    });
}
