use serde::Serialize;

use crate::listener::{ListenerSnapshot, UploadStatus};
use crate::storage::FileItem;

// progress of the session's current (or last) upload
#[derive(Serialize, Debug)]
pub struct ProgressResponse {
    pub session_id: String,
    pub status: UploadStatus,
    pub bytes_read: u64,
    pub content_length: i64,
    pub percent: u8,
    pub item_index: usize,
    pub item_name: Option<String>,
    pub error: Option<String>,
    pub started_at: String,
}

impl From<ListenerSnapshot> for ProgressResponse {
    fn from(snapshot: ListenerSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            status: snapshot.status,
            bytes_read: snapshot.bytes_read,
            content_length: snapshot.content_length,
            percent: snapshot.percent,
            item_index: snapshot.item_index,
            item_name: snapshot.item_name,
            error: snapshot.error.map(|e| e.to_string()),
            started_at: snapshot.created_at.to_rfc3339(),
        }
    }
}

// one stored form field
#[derive(Serialize, Debug)]
pub struct ItemInfo {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub is_form_field: bool,
    pub size: u64,
}

impl ItemInfo {
    pub fn from_item(item: &dyn FileItem) -> Self {
        let header = item.header();
        Self {
            field_name: header.field_name.clone(),
            file_name: header.file_name.clone(),
            content_type: header.content_type.clone(),
            is_form_field: header.is_form_field,
            size: item.size(),
        }
    }
}

// response for the upload endpoint
#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    pub session_id: String,
    pub bytes_read: u64,
    pub items: Vec<ItemInfo>,
}

// response for the cancel endpoint
#[derive(Serialize, Debug)]
pub struct CancelResponse {
    pub canceled: bool,
    pub status: UploadStatus,
}

// response for item deletion
#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub success: bool,
    pub field_name: String,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
