#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the UNICEF SDMX data client.
//!
//! This crate provides the foundational abstractions shared by the other crates:
//!
//! - [`ObservationRow`](types::ObservationRow) - One decoded observation
//! - [`ResultTable`](types::ResultTable) - Cleaned, shaped result
//! - [`YearSelection`](year::YearSelection) - Year arguments and selection policy
//! - [`QueryKey`](query::QueryKey) - Resolved SDMX query, also the cache key
//! - [`ResponseStore`](cache::ResponseStore) - Caching abstraction
//! - [`HttpTransport`](transport::HttpTransport) - Transport abstraction

/// Response store trait and cache entry types.
pub mod cache;
/// Client configuration.
pub mod config;
/// Error types for data operations.
pub mod error;
/// Resolved query types.
pub mod query;
/// HTTP transport trait.
pub mod transport;
/// Core data types (observations, cells, tables).
pub mod types;
/// Year selection parsing.
pub mod year;

// Re-export commonly used items at crate root
pub use cache::{CacheStats, CachedPayload, ResponseStore};
pub use config::{ClientConfig, PayloadFormat};
pub use error::{Result, TransportError, UnicefError};
pub use query::{DataflowRef, FilterSet, QueryKey};
pub use transport::{HttpResponse, HttpTransport};
pub use types::{
    AGE, Cell, DATAFLOW, INDICATOR, OBS_VALUE, ObsValue, ObservationRow, REF_AREA, RESIDENCE,
    ResultTable, SEX, Shape, TIME_PERIOD, TOTAL_CODE, WEALTH_QUINTILE,
};
pub use year::YearSelection;
