use serde::{Deserialize, Serialize};
use thiserror::Error;

/// errors an upload can end with
///
/// only plain data lives in here so a listener holding one can be
/// persisted and restored without losing the message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UploadError {
    #[error("the request was rejected because its size ({actual} bytes) exceeds the configured maximum ({max} bytes)")]
    SizeLimitExceeded { actual: u64, max: u64 },
    #[error("upload canceled")]
    Canceled,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl UploadError {
    pub fn storage<T: ToString>(cause: T) -> Self {
        UploadError::Storage(cause.to_string())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, UploadError::Canceled)
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::storage(e)
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
