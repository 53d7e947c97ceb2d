//! Registry of upstream descriptors, keyed by their stringified URL.
//!
//! The registry never holds live connections; it records which upstreams are
//! currently reachable so the router can decide whether to dispatch. An
//! upstream's entry is removed while it is disconnected and re-inserted when
//! the composer reconnects it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::upstream::UpstreamDescriptor;

#[derive(Clone, Default)]
pub struct UpstreamRegistry {
    inner: Arc<RwLock<HashMap<String, UpstreamDescriptor>>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the descriptor under its URL key.
    pub async fn put(&self, descriptor: UpstreamDescriptor) {
        self.inner.write().await.insert(descriptor.key(), descriptor);
    }

    pub async fn get(&self, key: &str) -> Option<UpstreamDescriptor> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<UpstreamDescriptor> {
        self.inner.write().await.remove(key)
    }

    pub async fn list(&self) -> Vec<UpstreamDescriptor> {
        self.inner.read().await.values().cloned().collect()
    }
}
