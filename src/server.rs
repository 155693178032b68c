use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::cache::SharedCache;
use crate::config::Config;
use crate::handlers::{
    cancel_upload, delete_uploaded_file, get_uploaded_file, health_check, upload_file, upload_status,
};
use crate::middleware::{add_response_headers, SESSION_HEADER};
use crate::state::AppState;
use crate::utils::shutdown_signal;

/// build the upload router
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!("Building router with max request size: {} bytes", config.max_request_size);

    // configure cors
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(origins)
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        // the orchestrator enforces the size limit itself so it can report it
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/status", get(upload_status))
        .route("/upload/cancel", post(cancel_upload))
        .route(
            "/upload/files/:field",
            get(get_uploaded_file).delete(delete_uploaded_file),
        )
        .route("/health", get(health_check))
        .layer(axum::middleware::from_fn(add_response_headers))
        .layer(CompressionLayer::new().gzip(true).br(true))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// periodically drop expired cache entries
pub fn spawn_cache_janitor(cache: SharedCache, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            cache.purge_expired();
        }
    })
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) {
    tracing::info!("Starting server...");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::debug!("Listener bound to {}", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true);

    tracing::info!("Server running and ready to accept connections");
    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
    }
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("upload-tracker starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 UPLOAD SERVER: http://{}:{}", config.host, config.port);
    tracing::info!("💾 Storage backend: {:?}", config.storage_backend);
    tracing::info!("📏 Max request size: {} bytes", config.max_request_size);
    if !config.per_chunk_delay.is_zero() {
        tracing::info!("🐢 Per-chunk delay: {:?}", config.per_chunk_delay);
    }
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
