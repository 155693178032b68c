use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::cache::SharedCache;
use crate::config::Config;
use crate::registry::ListenerRegistry;
use crate::upload::{UploadOrchestrator, UploadedItems};

/// shared application state
pub struct AppState {
    pub orchestrator: UploadOrchestrator,
    pub cache: SharedCache,
    /// items of each session's last finished upload
    pub completed: DashMap<String, Arc<Mutex<UploadedItems>>>,
}

impl AppState {
    pub fn new(orchestrator: UploadOrchestrator, cache: SharedCache) -> Self {
        Self {
            orchestrator,
            cache,
            completed: DashMap::new(),
        }
    }

    /// build registry, cache and orchestrator from configuration
    pub fn from_config(config: &Config) -> Self {
        let cache = SharedCache::new();
        let registry = Arc::new(ListenerRegistry::new());
        let orchestrator = UploadOrchestrator::from_config(config, registry, cache.clone());
        Self::new(orchestrator, cache)
    }

    /// items for a session, cloned out so no map guard is held across awaits
    pub fn completed_items(&self, session_id: &str) -> Option<Arc<Mutex<UploadedItems>>> {
        self.completed.get(session_id).map(|entry| entry.value().clone())
    }

    /// remember a finished upload, returning the one it replaced
    pub fn store_completed(&self, session_id: &str, items: UploadedItems) -> Option<Arc<Mutex<UploadedItems>>> {
        self.completed
            .insert(session_id.to_string(), Arc::new(Mutex::new(items)))
    }
}
