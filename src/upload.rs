//! drives one multipart upload from first header to terminal status
//!
//! the multipart parser stays outside: it reports each part header through
//! [`UploadRun::start_item`], each body chunk through [`UploadRun::write_chunk`]
//! and the end of a part through [`UploadRun::end_item`]. the run keeps the
//! session's listener current and stores the payload through the configured
//! [`ItemFactory`].

use std::collections::hash_map::{self, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::cache::SharedCache;
use crate::config::{Config, StorageBackend};
use crate::error::{Result, UploadError};
use crate::listener::{ListenerSnapshot, UploadListener};
use crate::registry::ListenerRegistry;
use crate::storage::{build_factory, FileItem, ItemFactory, ItemHeader};

const LISTENER_KEY_PREFIX: &str = "listener:";

/// completed items of one upload, keyed by field name
#[derive(Debug, Default)]
pub struct UploadedItems {
    items: HashMap<String, Box<dyn FileItem>>,
}

impl UploadedItems {
    /// add an item, handing back the one previously stored under its field name
    pub fn insert(&mut self, item: Box<dyn FileItem>) -> Option<Box<dyn FileItem>> {
        self.items.insert(item.header().field_name.clone(), item)
    }

    pub fn get(&self, field_name: &str) -> Option<&dyn FileItem> {
        self.items.get(field_name).map(|item| &**item as &dyn FileItem)
    }

    pub fn remove(&mut self, field_name: &str) -> Option<Box<dyn FileItem>> {
        self.items.remove(field_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn FileItem> {
        self.items.values().map(|item| &**item as &dyn FileItem)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// delete every stored payload, the first failure is returned after trying all
    pub async fn delete_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for (_, mut item) in self.items.drain() {
            if let Err(e) = item.delete().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl IntoIterator for UploadedItems {
    type Item = (String, Box<dyn FileItem>);
    type IntoIter = hash_map::IntoIter<String, Box<dyn FileItem>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// server-side entry point for uploads, cheap to clone
#[derive(Debug, Clone)]
pub struct UploadOrchestrator {
    registry: Arc<ListenerRegistry>,
    factory: Arc<dyn ItemFactory>,
    snapshots: Option<(SharedCache, Duration)>,
    max_request_size: u64,
    per_chunk_delay: Duration,
    grace_period: Duration,
}

impl UploadOrchestrator {
    pub fn new(
        registry: Arc<ListenerRegistry>,
        factory: Arc<dyn ItemFactory>,
        max_request_size: u64,
        per_chunk_delay: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            factory,
            snapshots: None,
            max_request_size,
            per_chunk_delay,
            grace_period,
        }
    }

    /// wire the orchestrator the way the configuration asks for
    pub fn from_config(config: &Config, registry: Arc<ListenerRegistry>, cache: SharedCache) -> Self {
        let factory = build_factory(config, cache.clone());
        let orchestrator = Self::new(
            registry,
            factory,
            config.max_request_size,
            config.per_chunk_delay,
            config.listener_grace_period,
        );
        match config.storage_backend {
            StorageBackend::Cache => orchestrator.with_snapshot_cache(cache, config.cache_ttl),
            StorageBackend::Disk => orchestrator,
        }
    }

    /// also keep listener snapshots in `cache` so status survives registry eviction
    pub fn with_snapshot_cache(mut self, cache: SharedCache, ttl: Duration) -> Self {
        self.snapshots = Some((cache, ttl));
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    /// reject requests whose declared size is over the limit, unknown sizes pass
    pub fn check_request(&self, content_length: Option<u64>) -> Result<()> {
        let max = self.effective_limit();
        match content_length {
            Some(actual) if actual > max => Err(UploadError::SizeLimitExceeded { actual, max }),
            _ => Ok(()),
        }
    }

    fn effective_limit(&self) -> u64 {
        match self.factory.max_item_size() {
            Some(ceiling) => self.max_request_size.min(ceiling),
            None => self.max_request_size,
        }
    }

    /// validate the request, then register a fresh listener for the session
    pub fn begin(&self, session_id: &str, content_length: Option<u64>) -> Result<UploadRun> {
        if let Err(e) = self.check_request(content_length) {
            tracing::warn!("Rejected upload for session {}: {}", session_id, e);
            return Err(e);
        }

        let declared = content_length.map_or(-1, |len| len.min(i64::MAX as u64) as i64);
        let listener = Arc::new(UploadListener::new(session_id, declared, self.per_chunk_delay));
        self.registry.register(listener.clone());
        self.persist(&listener);
        tracing::info!("📤 Upload started for session {} ({} bytes declared)", session_id, declared);

        Ok(UploadRun {
            orchestrator: self.clone(),
            listener,
            content_length: declared,
            bytes_read: 0,
            item_count: 0,
            current: None,
            items: UploadedItems::default(),
            done: false,
        })
    }

    /// latest known state of the session's upload
    pub fn progress(&self, session_id: &str) -> Option<ListenerSnapshot> {
        if let Some(listener) = self.registry.current(session_id) {
            return Some(listener.snapshot());
        }
        let (cache, _) = self.snapshots.as_ref()?;
        let raw = cache.get(&snapshot_key(session_id))?;
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Discarding unreadable listener snapshot for {}: {}", session_id, e);
                None
            }
        }
    }

    /// flag the session's upload as canceled, the streaming task stops at its next chunk
    ///
    /// returns None when nothing is registered for the session
    pub fn cancel(&self, session_id: &str) -> Option<bool> {
        let listener = self.registry.current(session_id)?;
        let canceled = listener.set_exception(UploadError::Canceled);
        if canceled {
            tracing::info!("Cancellation requested for session {}", session_id);
            self.persist(&listener);
        }
        Some(canceled)
    }

    fn persist(&self, listener: &UploadListener) {
        let Some((cache, ttl)) = &self.snapshots else {
            return;
        };
        match serde_json::to_vec(&listener.snapshot()) {
            Ok(raw) => cache.put(snapshot_key(listener.session_id()), Bytes::from(raw), *ttl),
            Err(e) => tracing::warn!("Failed to persist listener for {}: {}", listener.session_id(), e),
        }
    }

    /// keep a finished listener around for a final poll, then drop it
    fn schedule_eviction(&self, listener: Arc<UploadListener>) {
        let registry = self.registry.clone();
        let grace = self.grace_period;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !grace.is_zero() => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if registry.remove_if_same(&listener) {
                        tracing::debug!("Evicted listener for session {}", listener.session_id());
                    }
                });
            }
            _ => {
                registry.remove_if_same(&listener);
            }
        }
    }
}

fn snapshot_key(session_id: &str) -> String {
    format!("{}{}", LISTENER_KEY_PREFIX, session_id)
}

/// one in-flight upload
///
/// dropping a run that never reached a terminal state marks it canceled
#[derive(Debug)]
pub struct UploadRun {
    orchestrator: UploadOrchestrator,
    listener: Arc<UploadListener>,
    content_length: i64,
    bytes_read: u64,
    item_count: usize,
    current: Option<Box<dyn FileItem>>,
    items: UploadedItems,
    done: bool,
}

impl UploadRun {
    pub fn listener(&self) -> &Arc<UploadListener> {
        &self.listener
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// open storage for the next part, closing the previous one if still open
    pub async fn start_item(&mut self, header: ItemHeader) -> Result<()> {
        self.ensure_running().await?;
        if self.current.is_some() {
            self.end_item().await?;
        }

        let session_id = self.listener.session_id().to_string();
        let name = header.file_name.clone().unwrap_or_else(|| header.field_name.clone());
        let created = self.orchestrator.factory.create_item(&session_id, header).await;
        let item = match created {
            Ok(item) => item,
            Err(e) => return Err(self.fail(e).await),
        };

        self.item_count += 1;
        tracing::debug!("Receiving item {} ({}) for session {}", self.item_count, name, session_id);
        self.listener.set_item_name(Some(name));
        self.listener.record(self.bytes_read, self.content_length, self.item_count);
        self.current = Some(item);
        Ok(())
    }

    /// store one body chunk of the current part and report it to the listener
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.ensure_running().await?;

        let total = self.bytes_read + chunk.len() as u64;
        let max = self.orchestrator.effective_limit();
        if total > max {
            return Err(self.fail(UploadError::SizeLimitExceeded { actual: total, max }).await);
        }

        let written = match self.current.as_mut() {
            Some(item) => item.write_chunk(chunk).await,
            None => Err(UploadError::storage("received data before any part header")),
        };
        if let Err(e) = written {
            return Err(self.fail(e).await);
        }

        self.bytes_read = total;
        tracing::trace!("Session {}: {} bytes read", self.listener.session_id(), total);
        self.listener
            .update(self.bytes_read, self.content_length, self.item_count)
            .await;
        Ok(())
    }

    /// finalize the current part
    pub async fn end_item(&mut self) -> Result<()> {
        let Some(mut item) = self.current.take() else {
            return Ok(());
        };
        if let Err(e) = item.close().await {
            let _ = item.delete().await;
            return Err(self.fail(e).await);
        }
        if let Some(mut replaced) = self.items.insert(item) {
            tracing::warn!("Field {} sent twice, keeping the last one", replaced.header().field_name);
            let _ = replaced.delete().await;
        }
        Ok(())
    }

    /// mark the upload successful and hand over its items
    pub async fn complete(mut self) -> Result<UploadedItems> {
        self.ensure_running().await?;
        self.end_item().await?;

        // a cancel can land while the last item was being closed
        if !self.listener.finish() {
            let recorded = self
                .listener
                .exception()
                .cloned()
                .unwrap_or(UploadError::Canceled);
            return Err(self.fail(recorded).await);
        }

        self.done = true;
        self.orchestrator.persist(&self.listener);
        self.orchestrator.schedule_eviction(self.listener.clone());
        tracing::info!(
            "✅ Upload complete for session {}: {} items, {} bytes",
            self.listener.session_id(),
            self.items.len(),
            self.bytes_read
        );
        Ok(std::mem::take(&mut self.items))
    }

    /// stop the upload with `err`, returning the error the listener ended up with
    pub async fn abort(mut self, err: UploadError) -> UploadError {
        self.fail(err).await
    }

    // stop streaming as soon as another task recorded an error (usually a cancel)
    async fn ensure_running(&mut self) -> Result<()> {
        if self.done {
            return Err(self
                .listener
                .exception()
                .cloned()
                .unwrap_or_else(|| UploadError::storage("upload already finished")));
        }
        let recorded = self.listener.exception().cloned();
        match recorded {
            Some(e) => Err(self.fail(e).await),
            None => Ok(()),
        }
    }

    async fn fail(&mut self, err: UploadError) -> UploadError {
        self.listener.set_exception(err.clone());
        let recorded = self.listener.exception().cloned().unwrap_or(err);

        if !self.done {
            self.done = true;
            if let Some(mut item) = self.current.take() {
                let _ = item.delete().await;
            }
            if let Err(e) = self.items.delete_all().await {
                tracing::warn!("Failed to clean up partial upload: {}", e);
            }

            let session_id = self.listener.session_id();
            if recorded.is_cancellation() {
                tracing::info!("Upload canceled for session {} after {} bytes", session_id, self.bytes_read);
            } else {
                tracing::error!("Upload failed for session {}: {}", session_id, recorded);
            }
            self.orchestrator.persist(&self.listener);
            self.orchestrator.schedule_eviction(self.listener.clone());
        }
        recorded
    }
}

impl Drop for UploadRun {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.listener.set_exception(UploadError::Canceled) {
            tracing::warn!("Upload for session {} dropped before completion", self.listener.session_id());
        }
        self.orchestrator.persist(&self.listener);
        self.orchestrator.schedule_eviction(self.listener.clone());

        let mut leftovers = std::mem::take(&mut self.items);
        if let Some(item) = self.current.take() {
            leftovers.insert(item);
        }
        if leftovers.is_empty() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = leftovers.delete_all().await;
            });
        }
    }
}
