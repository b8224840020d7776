//! Byte-to-URL registry used by the main-thread load path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An opaque `blob:` URL handed out by a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Creates, resolves and revokes object URLs for in-memory bytes.
pub trait ObjectUrlRegistry: Send + Sync {
    /// Register `bytes` and return a fresh URL for them.
    fn create(&self, bytes: Arc<[u8]>) -> ObjectUrl;

    /// Bytes behind a live URL.
    fn resolve(&self, url: &ObjectUrl) -> Option<Arc<[u8]>>;

    /// Revoke a URL. Returns false when it was not live.
    fn revoke(&self, url: &ObjectUrl) -> bool;
}

/// Process-local registry with usage counters.
#[derive(Debug, Default)]
pub struct InMemoryUrlRegistry {
    entries: Mutex<HashMap<ObjectUrl, Arc<[u8]>>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    revoked: AtomicUsize,
}

impl InMemoryUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of URLs currently registered.
    pub fn live(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl ObjectUrlRegistry for InMemoryUrlRegistry {
    fn create(&self, bytes: Arc<[u8]>) -> ObjectUrl {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let url = ObjectUrl(format!("blob:compressor/{id}"));
        self.entries.lock().insert(url.clone(), bytes);
        self.created.fetch_add(1, Ordering::SeqCst);
        url
    }

    fn resolve(&self, url: &ObjectUrl) -> Option<Arc<[u8]>> {
        self.entries.lock().get(url).cloned()
    }

    fn revoke(&self, url: &ObjectUrl) -> bool {
        let removed = self.entries.lock().remove(url).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}
