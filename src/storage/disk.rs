use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{FileItem, ItemFactory, ItemHeader, ItemReader};
use crate::error::{Result, UploadError};
use crate::utils::sanitize_filename;

/// writes every item straight to a file under `dir`
#[derive(Debug, Clone)]
pub struct DiskItemFactory {
    dir: PathBuf,
}

impl DiskItemFactory {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ItemFactory for DiskItemFactory {
    async fn create_item(&self, namespace: &str, header: ItemHeader) -> Result<Box<dyn FileItem>> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            tracing::error!("Failed to create upload directory {:?}: {}", self.dir, e);
            UploadError::from(e)
        })?;

        // unique name, the original file name only as a readable suffix
        let label = header
            .file_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| sanitize_filename(&header.field_name));
        let path = self.dir.join(format!("upload_{}_{}", Uuid::new_v4().simple(), label));
        tracing::trace!("Creating disk item for {}/{} at {:?}", namespace, header.field_name, path);

        let file = fs::File::create(&path).await.map_err(|e| {
            tracing::error!("Failed to create item file {:?}: {}", path, e);
            UploadError::from(e)
        })?;

        Ok(Box::new(DiskFileItem {
            header,
            path,
            file: Some(file),
            size: 0,
            closed: false,
        }))
    }

    fn max_item_size(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug)]
pub struct DiskFileItem {
    header: ItemHeader,
    path: PathBuf,
    file: Option<fs::File>,
    size: u64,
    closed: bool,
}

impl DiskFileItem {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileItem for DiskFileItem {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| UploadError::storage(format!("item {} is not writable", self.header.field_name)))?;
        file.write_all(chunk).await.map_err(|e| {
            tracing::error!("Failed to write to {:?}: {}", self.path, e);
            UploadError::from(e)
        })?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // the handle stays in place until the data is durable, so a failed
        // sync leaves the item open and close can be retried
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
            file.sync_all().await.map_err(|e| {
                tracing::error!("Failed to sync {:?}: {}", self.path, e);
                UploadError::from(e)
            })?;
            self.file = None;
            self.closed = true;
            tracing::debug!("Stored {} ({} bytes) at {:?}", self.header.field_name, self.size, self.path);
        }
        Ok(())
    }

    async fn open_reader(&self) -> Result<ItemReader> {
        if !self.closed {
            return Err(UploadError::storage(format!(
                "item {} is not readable before it is closed",
                self.header.field_name
            )));
        }
        let file = fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }

    async fn delete(&mut self) -> Result<()> {
        self.file = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!("Failed to delete {:?}: {}", self.path, e);
                return Err(e.into());
            }
        }
        self.size = 0;
        self.closed = true;
        tracing::debug!("Deleted disk item {}", self.header.field_name);
        Ok(())
    }
}
