//! SQLite-based response store implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};
use unicefdata_core::{CacheStats, CachedPayload, PayloadFormat, ResponseStore, Result, UnicefError};

/// SQLite-based store for SDMX payloads.
///
/// This store keeps payloads in a SQLite database file, providing persistence
/// across process runs. Each signature maps to exactly one row; `put` uses
/// `INSERT OR REPLACE`, so a refresh swaps the whole entry in one statement.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn cache_err(e: impl std::fmt::Display) -> UnicefError {
    UnicefError::Cache(e.to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(cache_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(cache_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(cache_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                signature TEXT PRIMARY KEY NOT NULL,
                format TEXT NOT NULL,
                body BLOB NOT NULL,
                fetched_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(cache_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_response_cache_fetched_at
             ON response_cache(fetched_at)",
            [],
        )
        .map_err(cache_err)?;

        debug!("SQLite store schema initialized");
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get(&self, signature: &str) -> Result<Option<CachedPayload>> {
        let conn = self.conn.lock().map_err(cache_err)?;

        let row = conn
            .query_row(
                "SELECT format, body, fetched_at FROM response_cache WHERE signature = ?1",
                params![signature],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(cache_err)?;

        let Some((format, body, fetched_at)) = row else {
            debug!("No cached response found");
            return Ok(None);
        };

        let format = PayloadFormat::from_tag(&format)
            .ok_or_else(|| UnicefError::Cache(format!("unknown payload format '{format}'")))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(cache_err)?
            .with_timezone(&Utc);

        debug!("Found cached response ({} bytes)", body.len());
        Ok(Some(CachedPayload {
            signature: signature.to_string(),
            format,
            body,
            fetched_at,
        }))
    }

    #[instrument(skip(self, entry), fields(signature = %entry.signature, bytes = entry.body.len()))]
    async fn put(&self, entry: CachedPayload) -> Result<()> {
        let conn = self.conn.lock().map_err(cache_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO response_cache (signature, format, body, fetched_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.signature,
                entry.format.as_str(),
                entry.body,
                timestamp(entry.fetched_at)
            ],
        )
        .map_err(cache_err)?;

        debug!("Cached response");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, signature: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(cache_err)?;
        let deleted = conn
            .execute(
                "DELETE FROM response_cache WHERE signature = ?1",
                params![signature],
            )
            .map_err(cache_err)?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| UnicefError::Cache(format!("Invalid TTL duration: {e}")))?;

        let conn = self.conn.lock().map_err(cache_err)?;
        let deleted = conn
            .execute(
                "DELETE FROM response_cache WHERE fetched_at < ?1",
                params![timestamp(cutoff)],
            )
            .map_err(cache_err)?;

        if deleted > 0 {
            debug!("Invalidated {} stale cache entries", deleted);
        }

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(cache_err)?;
        conn.execute("DELETE FROM response_cache", [])
            .map_err(cache_err)?;

        debug!("Cleared all cache entries");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().map_err(cache_err)?;
        let (count, bytes, oldest) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(body) + LENGTH(signature)), 0), MIN(fetched_at)
                 FROM response_cache",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .map_err(cache_err)?;

        let oldest_entry_age = oldest
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .and_then(|ts| {
                Utc::now()
                    .signed_duration_since(ts.with_timezone(&Utc))
                    .to_std()
                    .ok()
            });

        Ok(CacheStats {
            entry_count: usize::try_from(count).unwrap_or_default(),
            oldest_entry_age,
            size_estimate: usize::try_from(bytes).unwrap_or_default(),
        })
    }
}
