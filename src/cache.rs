use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

/// longest time an entry is kept, larger ttls are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Instant,
}

/// process-wide key/value byte cache with per-entry expiry
///
/// clones share the same entries. expired entries are dropped lazily on
/// access or by `purge_expired`.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: Bytes, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .or_else(|| now.checked_add(Duration::from_secs(24 * 3600)))
            .unwrap_or(now);
        tracing::trace!("Caching {} bytes under {} for {:?}", value.len(), key, ttl);
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        // drop the expired entry, unless a fresh one replaced it meanwhile
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
