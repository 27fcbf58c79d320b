#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Caching implementations for the UNICEF SDMX data client.
//!
//! This crate provides implementations of the [`ResponseStore`] trait from
//! `unicefdata-core`:
//!
//! - [`SqliteStore`] - Persistent SQLite-based store (default, requires `sqlite` feature)
//! - [`InMemoryStore`] - Process-local store
//! - [`NoopStore`] - No-op store that doesn't keep anything
//!
//! and [`SingleFlight`], which guarantees at most one in-flight load per key.

/// Single-flight keyed cache.
pub mod flight;
/// In-memory store implementation.
pub mod memory;
/// No-op store implementation.
pub mod noop;

/// SQLite-based store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use unicefdata_core::ResponseStore;

pub use flight::SingleFlight;
pub use memory::InMemoryStore;
pub use noop::NoopStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
