use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::util::ServiceExt;

use upload_tracker::config::{Config, StorageBackend};
use upload_tracker::server::build_router;
use upload_tracker::state::AppState;

const BOUNDARY: &str = "X-UPLOAD-BOUNDARY";

fn setup(config: Config) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::from_config(&config));
    (build_router(state.clone(), &config), state)
}

fn multipart_body() -> String {
    multipart_body_with("hello world")
}

fn multipart_body_with(content: &str) -> String {
    format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         holiday\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {c}\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
        c = content
    )
}

fn upload_request(session: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("X-Session-Id", session)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str, session: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Session-Id", session)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_session_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, _) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let response = app
        .oneshot(Request::builder().uri("/upload/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_without_upload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, _) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let response = app.oneshot(get("/upload/status", "nobody")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_then_poll_and_fetch() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, _) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let response = app
        .clone()
        .oneshot(upload_request("s1", multipart_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["items"][0]["field_name"], "file");
    assert_eq!(body["items"][0]["size"], 11);
    assert_eq!(body["items"][1]["is_form_field"], true);

    // the final poll sees the terminal state
    let response = app.clone().oneshot(get("/upload/status", "s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache, no-store, must-revalidate");
    let body = json_body(response).await;
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["percent"], 100);
    assert!(body["error"].is_null());

    let response = app.clone().oneshot(get("/upload/files/file", "s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), b"hello world");

    // other sessions see nothing
    let response = app.clone().oneshot(get("/upload/files/file", "s2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/upload/files/file")
        .header("X-Session-Id", "s1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let response = app.oneshot(get("/upload/files/file", "s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_second_upload_replaces_first_in_cache() {
    let (app, _) = setup(
        Config {
            storage_backend: StorageBackend::Cache,
            ..Config::default()
        }
        .with_backend_constraints(),
    );

    for content in ["first payload", "second payload"] {
        let response = app
            .clone()
            .oneshot(upload_request("s1", multipart_body_with(content)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    // let the superseded upload's cleanup run
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let response = app.oneshot(get("/upload/files/file", "s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), b"second payload");
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, state) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        max_request_size: 64,
        ..Config::default()
    });

    let response = app
        .clone()
        .oneshot(upload_request("s1", multipart_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("exceeds the configured maximum"));

    assert!(state.orchestrator.registry().current("s1").is_none());
    let response = app.oneshot(get("/upload/status", "s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_running_upload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, state) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let cancel = |session: &str| {
        Request::builder()
            .method("POST")
            .uri("/upload/cancel")
            .header("X-Session-Id", session)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(cancel("s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let run = state.orchestrator.begin("s1", Some(1000)).unwrap();
    let response = app.clone().oneshot(cancel("s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["canceled"], true);
    assert_eq!(body["status"], "CANCELED");

    let response = app.oneshot(get("/upload/status", "s1")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["status"], "CANCELED");
    assert_eq!(body["error"], "upload canceled");
    drop(run);
}

#[tokio::test]
async fn test_session_from_cookie() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, state) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });
    let run = state.orchestrator.begin("cookie-session", None).unwrap();

    let request = Request::builder()
        .uri("/upload/status")
        .header(header::COOKIE, "theme=dark; session_id=cookie-session")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "RUNNING");
    drop(run);
}

#[tokio::test]
async fn test_health_check() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (app, _) = setup(Config {
        upload_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_uploads"], 0);
}
