//! storage backends for uploaded form fields
//!
//! every backend hands out [`FileItem`]s with write-then-read semantics: the
//! multipart consumer writes the whole payload, closes the item (which
//! finalizes it) and from then on the item can only be read or deleted.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cache::SharedCache;
use crate::config::{Config, StorageBackend};
use crate::error::Result;

pub mod cache;
pub mod disk;

pub use self::cache::{CacheFileItem, CacheItemFactory, PersistedItem};
pub use self::disk::{DiskFileItem, DiskItemFactory};

/// headers the multipart parser reports for one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHeader {
    pub field_name: String,
    pub content_type: Option<String>,
    pub is_form_field: bool,
    pub file_name: Option<String>,
}

impl ItemHeader {
    pub fn new(
        field_name: impl Into<String>,
        content_type: Option<String>,
        is_form_field: bool,
        file_name: Option<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            content_type,
            is_form_field,
            file_name,
        }
    }
}

pub type ItemReader = Box<dyn AsyncRead + Send + Unpin>;

/// one stored form field, acting as its own single-use sink until closed
#[async_trait]
pub trait FileItem: Debug + Send + Sync {
    fn header(&self) -> &ItemHeader;

    /// bytes written so far, or the final size once closed
    fn size(&self) -> u64;

    fn is_closed(&self) -> bool;

    /// append a chunk, only valid before `close`
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// finalize the payload, closing twice is a no-op
    async fn close(&mut self) -> Result<()>;

    /// stream the stored payload, only valid after `close`
    async fn open_reader(&self) -> Result<ItemReader>;

    async fn bytes(&self) -> Result<Bytes> {
        let mut reader = self.open_reader().await?;
        let mut buf = Vec::with_capacity(self.size() as usize);
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn delete(&mut self) -> Result<()>;
}

/// creates items for one backend
#[async_trait]
pub trait ItemFactory: Debug + Send + Sync {
    /// `namespace` scopes the stored item, usually the uploading session
    async fn create_item(&self, namespace: &str, header: ItemHeader) -> Result<Box<dyn FileItem>>;

    /// hard ceiling for a single item, None when only the filesystem bounds it
    fn max_item_size(&self) -> Option<u64>;
}

/// build the backend selected by configuration
pub fn build_factory(config: &Config, cache: SharedCache) -> Arc<dyn ItemFactory> {
    match config.storage_backend {
        StorageBackend::Disk => {
            tracing::debug!("Using disk item storage at {:?}", config.upload_dir);
            Arc::new(DiskItemFactory::new(config.upload_dir.clone()))
        }
        StorageBackend::Cache => {
            tracing::debug!(
                "Using cache item storage ({} bytes per item, ttl {:?})",
                config.cache_request_size,
                config.cache_ttl
            );
            Arc::new(CacheItemFactory::new(
                cache,
                config.cache_request_size,
                config.cache_ttl,
            ))
        }
    }
}
