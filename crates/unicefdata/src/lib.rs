#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Client for the UNICEF SDMX data warehouse.
//!
//! This crate re-exports the core types, the response stores and the SDMX
//! protocol layer, and provides [`UnicefClient`], which turns a
//! [`RetrievalRequest`] into a shaped [`ResultTable`].
//!
//! # Features
//!
//! - `sqlite` - persistent response store, [`SqliteStore`]

// Core types and traits
pub use unicefdata_core::*;

// Response stores
#[cfg(feature = "sqlite")]
pub use unicefdata_cache::SqliteStore;
pub use unicefdata_cache::{InMemoryStore, NoopStore};

// Protocol layer
pub use unicefdata_sdmx::{
    Category, Code, CodeTranslator, Codelist, DataflowInfo, DataflowSchema, Dimension,
    FetchOutcome, IndicatorDirectory, IndicatorInfo, InvalidateScope, MetadataCache,
    ObservationDecoder, ReqwestTransport, SdmxFetcher, SdmxQueryBuilder,
};

pub use polars::prelude::DataFrame;

/// The client and its per-indicator report.
pub mod client;
/// Post-hoc filtering of result tables.
pub mod filter;
/// Per-country reference attributes.
pub mod reference;
/// Retrieval requests.
pub mod request;
/// Year selection, cleaning, metadata joins and reshaping.
pub mod shaper;

#[cfg(test)]
mod testing;

pub use client::{ClientBuilder, IndicatorStatus, Retrieval, RetrievalReport, UnicefClient};
pub use filter::TableFilter;
pub use reference::ReferenceTable;
pub use request::RetrievalRequest;
pub use shaper::{MetadataJoin, ResultShaper};
