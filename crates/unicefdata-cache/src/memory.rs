//! In-memory response store implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use unicefdata_core::{CacheStats, CachedPayload, ResponseStore, Result};

/// Process-local response store.
///
/// Payloads are stored in a `RwLock`-protected `HashMap` and are lost when
/// the store is dropped. A `put` swaps the whole entry under the write lock,
/// so readers never see a partially written payload.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, CachedPayload>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseStore for InMemoryStore {
    #[instrument(skip(self))]
    async fn get(&self, signature: &str) -> Result<Option<CachedPayload>> {
        let entries = self.entries.read().await;
        match entries.get(signature) {
            Some(entry) => {
                debug!("Cache hit for response");
                Ok(Some(entry.clone()))
            }
            None => {
                debug!("Cache miss for response");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, entry), fields(signature = %entry.signature, bytes = entry.body.len()))]
    async fn put(&self, entry: CachedPayload) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.signature.clone(), entry);
        debug!("Cached response");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, signature: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(signature).is_some())
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_stale(ttl));
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        }

        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        debug!("Cleared all cache entries");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().await;
        Ok(CacheStats {
            entry_count: entries.len(),
            oldest_entry_age: entries.values().map(CachedPayload::age).max(),
            size_estimate: entries
                .values()
                .map(|e| e.body.len() + e.signature.len())
                .sum(),
        })
    }
}
