//! Metadata cache.
//!
//! [`MetadataCache`] holds the indicator directory, the dataflow listing and
//! one schema per dataflow. Each entry is fetched on first use through the
//! fetcher's retry policy and kept until invalidated; concurrent first uses
//! of one entry share a single fetch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use unicefdata_cache::SingleFlight;
use unicefdata_core::{CacheStats, Result, UnicefError};

use crate::directory::{INDICATOR_CODELIST, IndicatorDirectory};
use crate::fetcher::{Response, SdmxFetcher};
use crate::structure::{
    Codelist, DataflowInfo, DataflowSchema, STRUCTURE_ACCEPT, parse_codelist,
    parse_dataflow_list, parse_dataflow_schema,
};

/// What [`MetadataCache::invalidate`] drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateScope {
    /// Every entry.
    All,
    /// The indicator directory.
    Directory,
    /// The dataflow listing.
    DataflowList,
    /// One dataflow's schema, including its codelists.
    Dataflow(String),
}

/// Lazily populated, explicitly cleared metadata.
#[derive(Debug)]
pub struct MetadataCache {
    fetcher: Arc<SdmxFetcher>,
    directory: SingleFlight<(), IndicatorDirectory, UnicefError>,
    dataflows: SingleFlight<(), Vec<DataflowInfo>, UnicefError>,
    schemas: SingleFlight<String, DataflowSchema, UnicefError>,
}

impl MetadataCache {
    /// Creates an empty cache fetching through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<SdmxFetcher>) -> Self {
        Self {
            fetcher,
            directory: SingleFlight::new(),
            dataflows: SingleFlight::new(),
            schemas: SingleFlight::new(),
        }
    }

    async fn fetch_structure(&self, path: &str, what: &str) -> Result<Vec<u8>> {
        match self
            .fetcher
            .request(&self.fetcher.url(path), STRUCTURE_ACCEPT)
            .await?
        {
            Response::Body(body) => Ok(body),
            Response::NotFound => Err(UnicefError::NotFound {
                dataflow: what.to_string(),
                key: "structure".to_string(),
            }),
        }
    }

    /// The indicator directory.
    ///
    /// # Errors
    /// Returns a fetch or decode error; nothing is cached on failure.
    #[instrument(skip(self))]
    pub async fn indicator_directory(&self) -> Result<Arc<IndicatorDirectory>> {
        self.directory
            .get_or_try_load(&(), || async {
                let agency = &self.fetcher.config().agency;
                let path = format!("codelist/{agency}/{INDICATOR_CODELIST}/latest");
                let body = self.fetch_structure(&path, INDICATOR_CODELIST).await?;
                let directory =
                    IndicatorDirectory::from_codelist(&parse_codelist(&body, INDICATOR_CODELIST)?);
                debug!(indicators = directory.len(), "loaded indicator directory");
                Ok(directory)
            })
            .await
    }

    /// Every dataflow of the agency.
    ///
    /// # Errors
    /// Returns a fetch or decode error; nothing is cached on failure.
    #[instrument(skip(self))]
    pub async fn dataflows(&self) -> Result<Arc<Vec<DataflowInfo>>> {
        self.dataflows
            .get_or_try_load(&(), || async {
                let agency = &self.fetcher.config().agency;
                let path = format!("dataflow/{agency}?references=none&detail=allstubs");
                let flows = parse_dataflow_list(&self.fetch_structure(&path, agency).await?)?;
                debug!(dataflows = flows.len(), "loaded dataflow list");
                Ok(flows)
            })
            .await
    }

    /// Schema of one dataflow, with the codelists of its dimensions.
    ///
    /// # Errors
    /// Returns [`UnicefError::NotFound`] for an unknown dataflow, or a fetch
    /// or decode error.
    #[instrument(skip(self))]
    pub async fn schema(&self, flow_id: &str) -> Result<Arc<DataflowSchema>> {
        self.schemas
            .get_or_try_load(&flow_id.to_string(), || async {
                let agency = &self.fetcher.config().agency;
                let path = format!(
                    "dataflow/{agency}/{flow_id}/latest?references=all&detail=referencepartial"
                );
                let schema = parse_dataflow_schema(&self.fetch_structure(&path, flow_id).await?, flow_id)?;
                debug!(dimensions = schema.dimensions.len(), "loaded dataflow schema");
                Ok(schema)
            })
            .await
    }

    /// Codelist of one dimension of a dataflow.
    ///
    /// # Errors
    /// Returns a validation error if the dimension has no codelist, or any
    /// error from [`MetadataCache::schema`].
    pub async fn codelist(&self, flow_id: &str, dimension: &str) -> Result<Codelist> {
        let schema = self.schema(flow_id).await?;
        schema.codelist(dimension).cloned().ok_or_else(|| {
            UnicefError::validation(
                dimension,
                format!("dataflow {flow_id} has no codelist for dimension {dimension}"),
            )
        })
    }

    /// Drops cached entries. Never refetches; the next access does.
    ///
    /// Returns the number of loaded entries dropped.
    #[instrument(skip(self))]
    pub fn invalidate(&self, scope: &InvalidateScope) -> usize {
        let dropped = match scope {
            InvalidateScope::All => {
                let count = self.len();
                self.directory.clear();
                self.dataflows.clear();
                self.schemas.clear();
                count
            }
            InvalidateScope::Directory => usize::from(self.directory.invalidate(&())),
            InvalidateScope::DataflowList => usize::from(self.dataflows.invalidate(&())),
            InvalidateScope::Dataflow(flow) => usize::from(self.schemas.invalidate(flow)),
        };
        info!(dropped, "metadata invalidated");
        dropped
    }

    /// Drops everything, then eagerly refetches the indicator directory.
    ///
    /// # Errors
    /// Returns the refetch error; the cache stays empty in that case.
    pub async fn reload(&self) -> Result<()> {
        self.invalidate(&InvalidateScope::All);
        self.indicator_directory().await.map(|_| ())
    }

    /// Number of loaded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directory.len() + self.dataflows.len() + self.schemas.len()
    }

    /// Returns true if nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary of the loaded entries. Sizes are estimated from code and
    /// label lengths.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let directory_size: usize = self
            .directory
            .values()
            .iter()
            .map(|d| d.iter().map(|i| i.code.len() + i.name.len()).sum::<usize>())
            .sum();
        let dataflow_size: usize = self
            .dataflows
            .values()
            .iter()
            .map(|flows| flows.iter().map(|f| f.id.len() + f.name.len()).sum::<usize>())
            .sum();
        let schema_size: usize = self
            .schemas
            .values()
            .iter()
            .map(|s| s.codelists.values().map(codelist_size).sum::<usize>())
            .sum();

        let oldest: Option<Duration> = [
            self.directory.oldest_age(),
            self.dataflows.oldest_age(),
            self.schemas.oldest_age(),
        ]
        .into_iter()
        .flatten()
        .max();

        CacheStats {
            entry_count: self.len(),
            oldest_entry_age: oldest,
            size_estimate: directory_size + dataflow_size + schema_size,
        }
    }
}

fn codelist_size(codelist: &Codelist) -> usize {
    codelist
        .codes
        .iter()
        .map(|c| c.id.len() + c.name.len())
        .sum()
}
