use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FileItem, ItemFactory, ItemHeader, ItemReader};
use crate::cache::SharedCache;
use crate::error::{Result, UploadError};

/// largest request accepted on memory constrained deployments
pub const DEFAULT_REQUEST_SIZE: usize = 512 * 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// buffers each item in memory and moves it into the shared cache on close
#[derive(Debug, Clone)]
pub struct CacheItemFactory {
    cache: SharedCache,
    request_size: usize,
    ttl: Duration,
}

impl CacheItemFactory {
    pub fn new(cache: SharedCache, request_size: usize, ttl: Duration) -> Self {
        Self {
            cache,
            request_size,
            ttl,
        }
    }

    pub fn with_defaults(cache: SharedCache) -> Self {
        Self::new(cache, DEFAULT_REQUEST_SIZE, DEFAULT_CACHE_TTL)
    }

    pub fn request_size(&self) -> usize {
        self.request_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// common prefix of every item created for `field_name` in `namespace`
    pub fn item_key(namespace: &str, field_name: &str) -> String {
        if namespace.is_empty() {
            field_name.to_string()
        } else {
            format!("{}/{}", namespace, field_name)
        }
    }

    /// create an item without going through the trait object
    ///
    /// every item gets its own key so deleting a superseded item never
    /// touches the payload of the one that replaced it
    pub fn new_item(&self, namespace: &str, header: ItemHeader) -> CacheFileItem {
        CacheFileItem {
            key: format!(
                "{}/{}",
                Self::item_key(namespace, &header.field_name),
                Uuid::new_v4().simple()
            ),
            header,
            capacity: self.request_size,
            ttl: self.ttl,
            buffer: Some(BytesMut::with_capacity(self.request_size)),
            size: 0,
            cache: self.cache.clone(),
        }
    }
}

#[async_trait]
impl ItemFactory for CacheItemFactory {
    async fn create_item(&self, namespace: &str, header: ItemHeader) -> Result<Box<dyn FileItem>> {
        Ok(Box::new(self.new_item(namespace, header)))
    }

    fn max_item_size(&self) -> Option<u64> {
        Some(self.request_size as u64)
    }
}

/// an item whose bytes live in the shared cache once closed
///
/// while open the payload sits in a buffer of fixed capacity; closing moves
/// it into the cache and drops the buffer so resident memory stays bounded.
#[derive(Debug)]
pub struct CacheFileItem {
    header: ItemHeader,
    key: String,
    capacity: usize,
    ttl: Duration,
    buffer: Option<BytesMut>,
    size: u64,
    cache: SharedCache,
}

/// plain data form of a [`CacheFileItem`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub header: ItemHeader,
    pub key: String,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub size: u64,
    /// unflushed payload, None once the item went to the cache
    pub buffer: Option<Vec<u8>>,
}

impl CacheFileItem {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_in_memory(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn persisted(&self) -> PersistedItem {
        PersistedItem {
            header: self.header.clone(),
            key: self.key.clone(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
            size: self.size,
            buffer: self.buffer.as_ref().map(|buf| buf.to_vec()),
        }
    }

    pub fn restore(persisted: PersistedItem, cache: SharedCache) -> Self {
        let buffer = persisted.buffer.map(|data| {
            let mut buf = BytesMut::with_capacity(persisted.capacity.max(data.len()));
            buf.extend_from_slice(&data);
            buf
        });
        Self {
            header: persisted.header,
            key: persisted.key,
            capacity: persisted.capacity,
            ttl: Duration::from_secs(persisted.ttl_secs),
            buffer,
            size: persisted.size,
            cache,
        }
    }

    fn cached(&self) -> Result<Bytes> {
        self.cache
            .get(&self.key)
            .ok_or_else(|| UploadError::storage(format!("cached item {} is missing or expired", self.key)))
    }
}

#[async_trait]
impl FileItem for CacheFileItem {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn size(&self) -> u64 {
        match &self.buffer {
            Some(buf) => buf.len() as u64,
            None => self.size,
        }
    }

    fn is_closed(&self) -> bool {
        self.buffer.is_none()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let capacity = self.capacity;
        let buf = self
            .buffer
            .as_mut()
            .ok_or_else(|| UploadError::storage(format!("item {} is already closed", self.key)))?;
        let wanted = buf.len() + chunk.len();
        if wanted > capacity {
            // never grow past the configured ceiling, the chunk is rejected whole
            tracing::warn!("Item {} would exceed its {} byte buffer", self.key, capacity);
            return Err(UploadError::SizeLimitExceeded {
                actual: wanted as u64,
                max: capacity as u64,
            });
        }
        buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(buf) = self.buffer.take() {
            self.size = buf.len() as u64;
            self.cache.put(self.key.clone(), buf.freeze(), self.ttl);
            tracing::debug!("Moved {} ({} bytes) into the cache", self.key, self.size);
        }
        Ok(())
    }

    async fn open_reader(&self) -> Result<ItemReader> {
        Ok(Box::new(Cursor::new(self.bytes().await?)))
    }

    async fn bytes(&self) -> Result<Bytes> {
        if self.buffer.is_some() {
            return Err(UploadError::storage(format!(
                "item {} is not readable before it is closed",
                self.key
            )));
        }
        self.cached()
    }

    async fn delete(&mut self) -> Result<()> {
        match self.buffer.as_mut() {
            Some(buf) => buf.clear(),
            None => {
                self.cache.remove(&self.key);
                self.buffer = Some(BytesMut::with_capacity(self.capacity));
            }
        }
        self.size = 0;
        tracing::debug!("Deleted cache item {}", self.key);
        Ok(())
    }
}
