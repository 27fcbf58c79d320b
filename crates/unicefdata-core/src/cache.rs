//! Response store trait for caching fetched SDMX payloads.
//!
//! This module defines the [`ResponseStore`] trait: a key-value store keyed by
//! [`QueryKey::signature`](crate::QueryKey::signature) holding the raw payload
//! of the last successful fetch for that key.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::PayloadFormat, error::Result};

/// A cached response body.
///
/// Entries are never mutated in place; a refresh replaces the whole entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    /// Query signature this payload answers.
    pub signature: String,
    /// Wire format of `body`.
    pub format: PayloadFormat,
    /// Raw response body.
    pub body: Vec<u8>,
    /// When the payload was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl CachedPayload {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(signature: impl Into<String>, format: PayloadFormat, body: Vec<u8>) -> Self {
        Self {
            signature: signature.into(),
            format,
            body,
            fetched_at: Utc::now(),
        }
    }

    /// Age of the entry.
    #[must_use]
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Returns true if the entry is older than `ttl`.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Summary of a store's contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries.
    pub entry_count: usize,
    /// Age of the oldest entry, if any.
    pub oldest_entry_age: Option<Duration>,
    /// Approximate bytes held.
    pub size_estimate: usize,
}

impl CacheStats {
    /// Combines two summaries.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            entry_count: self.entry_count + other.entry_count,
            oldest_entry_age: match (self.oldest_entry_age, other.oldest_entry_age) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            size_estimate: self.size_estimate + other.size_estimate,
        }
    }
}

/// Trait for storing fetched SDMX payloads.
///
/// Implementations can store data in various backends (SQLite, in-memory, etc.)
/// to avoid repeated API calls. A `put` replaces any prior entry for the same
/// signature atomically: readers see either the old or the new entry.
#[async_trait]
pub trait ResponseStore: Send + Sync + Debug {
    /// Retrieves the payload cached for a query signature.
    ///
    /// Returns `Ok(Some(entry))` if cached, `Ok(None)` if not cached.
    async fn get(&self, signature: &str) -> Result<Option<CachedPayload>>;

    /// Stores a payload, replacing any previous entry for its signature.
    async fn put(&self, entry: CachedPayload) -> Result<()>;

    /// Removes one entry. Returns true if an entry was removed.
    async fn remove(&self, signature: &str) -> Result<bool>;

    /// Removes entries older than the specified TTL.
    ///
    /// Returns the number of entries invalidated.
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize>;

    /// Clears all cached payloads.
    async fn clear(&self) -> Result<()>;

    /// Summarizes the store's contents.
    async fn stats(&self) -> Result<CacheStats>;
}
