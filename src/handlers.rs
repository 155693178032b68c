use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::error::UploadError;
use crate::listener::UploadStatus;
use crate::middleware::SessionId;
use crate::models::{
    CancelResponse, DeleteResponse, ErrorResponse, ItemInfo, ProgressResponse, UploadResponse,
};
use crate::state::AppState;
use crate::storage::ItemHeader;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

/// map an upload error to the status the client sees
pub fn upload_error_response(err: &UploadError) -> ApiError {
    let status = match err {
        UploadError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::Canceled => StatusCode::CONFLICT,
        UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// receive a multipart upload, tracking progress under the caller's session
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let content_length = declared_length(&headers);
    tracing::debug!("Processing upload for session {} ({:?} bytes)", session.as_str(), content_length);

    // size is checked before a single body byte is read
    let mut run = state
        .orchestrator
        .begin(session.as_str(), content_length)
        .map_err(|e| upload_error_response(&e))?;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let err = run.abort(UploadError::storage(format!("malformed multipart body: {}", e))).await;
                return Err(upload_error_response(&err));
            }
        };

        let header = ItemHeader::new(
            field.name().unwrap_or_default(),
            field.content_type().map(str::to_string),
            field.file_name().is_none(),
            field.file_name().map(str::to_string),
        );
        run.start_item(header)
            .await
            .map_err(|e| upload_error_response(&e))?;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => run
                    .write_chunk(&chunk)
                    .await
                    .map_err(|e| upload_error_response(&e))?,
                Ok(None) => break,
                Err(e) => {
                    let err = run.abort(UploadError::storage(format!("failed to read upload stream: {}", e))).await;
                    return Err(upload_error_response(&err));
                }
            }
        }

        run.end_item().await.map_err(|e| upload_error_response(&e))?;
    }

    let bytes_read = run.bytes_read();
    let items = run.complete().await.map_err(|e| upload_error_response(&e))?;
    let mut infos: Vec<ItemInfo> = items.iter().map(ItemInfo::from_item).collect();
    infos.sort_by(|a, b| a.field_name.cmp(&b.field_name));

    if let Some(previous) = state.store_completed(session.as_str(), items) {
        // the session's earlier upload is no longer reachable
        tokio::spawn(async move {
            if let Err(e) = previous.lock().await.delete_all().await {
                tracing::warn!("Failed to delete superseded upload: {}", e);
            }
        });
    }

    Ok(Json(UploadResponse {
        success: true,
        session_id: session.0,
        bytes_read,
        items: infos,
    }))
}

// report the last known state of the session's upload
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    session: SessionId,
) -> Result<Json<ProgressResponse>, ApiError> {
    let snapshot = state.orchestrator.progress(session.as_str()).ok_or_else(|| {
        tracing::trace!("No upload tracked for session {}", session.as_str());
        error_response(StatusCode::NOT_FOUND, "No upload in progress for this session")
    })?;
    tracing::trace!(
        "Status for {}: {:?} {}%",
        session.as_str(),
        snapshot.status,
        snapshot.percent
    );
    Ok(Json(ProgressResponse::from(snapshot)))
}

// ask the session's running upload to stop
pub async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    session: SessionId,
) -> Result<Json<CancelResponse>, ApiError> {
    let canceled = state.orchestrator.cancel(session.as_str()).ok_or_else(|| {
        tracing::warn!("Cancel requested for unknown session {}", session.as_str());
        error_response(StatusCode::NOT_FOUND, "No upload in progress for this session")
    })?;
    let status = state
        .orchestrator
        .progress(session.as_str())
        .map(|snapshot| snapshot.status)
        .unwrap_or(UploadStatus::Canceled);

    Ok(Json(CancelResponse { canceled, status }))
}

// send back a stored item of the session's last upload
pub async fn get_uploaded_file(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    Path(field_name): Path<String>,
) -> Result<Response, ApiError> {
    let items = state.completed_items(session.as_str()).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, "No completed upload for this session")
    })?;
    let guard = items.lock().await;
    let item = guard.get(&field_name).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, format!("Item not found: {}", field_name))
    })?;

    let data = item.bytes().await.map_err(|e| {
        tracing::error!("Failed to read item {}: {}", field_name, e);
        upload_error_response(&e)
    })?;
    let content_type = item
        .header()
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    tracing::debug!("Serving item {} ({} bytes)", field_name, data.len());

    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

// delete a stored item of the session's last upload
pub async fn delete_uploaded_file(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    Path(field_name): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let items = state.completed_items(session.as_str()).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, "No completed upload for this session")
    })?;
    let mut item = items.lock().await.remove(&field_name).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, format!("Item not found: {}", field_name))
    })?;

    item.delete().await.map_err(|e| {
        tracing::error!("Failed to delete item {}: {}", field_name, e);
        upload_error_response(&e)
    })?;
    tracing::info!("🗑️  Deleted item {} of session {}", field_name, session.as_str());

    Ok(Json(DeleteResponse {
        success: true,
        field_name,
    }))
}

// health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-tracker",
        "active_uploads": state.orchestrator.registry().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
