use std::sync::Arc;

use dashmap::DashMap;

use crate::listener::UploadListener;

/// session id -> listener tracking that session's current upload
///
/// dashmap shards its locks, so unrelated sessions never wait on each other
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, Arc<UploadListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    /// store the listener under its session, returning the one it replaced
    pub fn register(&self, listener: Arc<UploadListener>) -> Option<Arc<UploadListener>> {
        let session_id = listener.session_id().to_string();
        let previous = self.listeners.insert(session_id.clone(), listener);
        if previous.is_some() {
            tracing::debug!("Replaced abandoned upload listener for session {}", session_id);
        }
        previous
    }

    pub fn current(&self, session_id: &str) -> Option<Arc<UploadListener>> {
        self.listeners.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<UploadListener>> {
        self.listeners.remove(session_id).map(|(_, listener)| listener)
    }

    /// remove the session entry only while it still points at `listener`
    pub fn remove_if_same(&self, listener: &Arc<UploadListener>) -> bool {
        self.listeners
            .remove_if(listener.session_id(), |_, current| Arc::ptr_eq(current, listener))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
