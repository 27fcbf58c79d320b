//! No-op response store implementation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;
use unicefdata_core::{CacheStats, CachedPayload, ResponseStore, Result};

/// A store that doesn't keep anything.
///
/// `get` always returns `Ok(None)` and `put` always returns `Ok(())`.
/// Useful for disabling response caching; in-flight deduplication still
/// applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl NoopStore {
    /// Create a new no-op store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseStore for NoopStore {
    async fn get(&self, _signature: &str) -> Result<Option<CachedPayload>> {
        trace!("NoopStore: get called, returning None");
        Ok(None)
    }

    async fn put(&self, _entry: CachedPayload) -> Result<()> {
        trace!("NoopStore: put called, doing nothing");
        Ok(())
    }

    async fn remove(&self, _signature: &str) -> Result<bool> {
        Ok(false)
    }

    async fn invalidate_stale(&self, _ttl: Duration) -> Result<usize> {
        trace!("NoopStore: invalidate_stale called, returning 0");
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        trace!("NoopStore: clear called, doing nothing");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats::default())
    }
}
