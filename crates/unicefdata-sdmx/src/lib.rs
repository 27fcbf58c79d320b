#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! SDMX REST protocol layer for the UNICEF data client.
//!
//! Resolution runs leaf-first: [`MetadataCache`] supplies the schema,
//! [`CodeTranslator`] resolves filters against its codelists,
//! [`SdmxQueryBuilder`] renders the [`QueryKey`](unicefdata_core::QueryKey),
//! [`SdmxFetcher`] executes it and [`ObservationDecoder`] decodes the body.

/// Query key construction.
pub mod builder;
/// Data payload decoding.
pub mod decoder;
/// Indicator directory and dataflow routing.
pub mod directory;
/// Retrying fetcher with response cache.
pub mod fetcher;
/// `reqwest` transport.
pub mod http;
/// Metadata cache.
pub mod metadata;
/// Structure message decoding.
pub mod structure;
/// Friendly value translation.
pub mod translator;

#[cfg(test)]
mod mock;

pub use builder::SdmxQueryBuilder;
pub use decoder::ObservationDecoder;
pub use directory::{Category, IndicatorDirectory, IndicatorInfo};
pub use fetcher::{FetchOutcome, SdmxFetcher};
pub use http::ReqwestTransport;
pub use metadata::{InvalidateScope, MetadataCache};
pub use structure::{Code, Codelist, DataflowInfo, DataflowSchema, Dimension};
pub use translator::CodeTranslator;
