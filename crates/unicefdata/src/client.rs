//! The UNICEF data client.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use unicefdata_cache::InMemoryStore;
use unicefdata_core::{
    CacheStats, ClientConfig, HttpTransport, INDICATOR, ObservationRow, QueryKey, REF_AREA,
    ResponseStore, Result, ResultTable, UnicefError, YearSelection,
};
use unicefdata_sdmx::directory::{INDICATOR_CODELIST, MAX_SUGGESTIONS};
use unicefdata_sdmx::{
    Category, CodeTranslator, DataflowInfo, DataflowSchema, FetchOutcome, IndicatorDirectory,
    IndicatorInfo, InvalidateScope, MetadataCache, ObservationDecoder, ReqwestTransport,
    SdmxFetcher, SdmxQueryBuilder,
};

use crate::filter::TableFilter;
use crate::reference::ReferenceTable;
use crate::request::RetrievalRequest;
use crate::shaper::{INDICATOR_NAME, MetadataJoin, ResultShaper};

/// Outcome of one indicator within a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorStatus {
    /// Fetched from the API.
    Success,
    /// Served from the response cache.
    Cached,
    /// The API has no data for the indicator and filters.
    NotFound,
    /// The indicator's dataflow failed.
    Failed(String),
}

impl IndicatorStatus {
    /// Returns true if data was retrieved.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Cached)
    }
}

impl fmt::Display for IndicatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Cached => f.write_str("cached"),
            Self::NotFound => f.write_str("not_found"),
            Self::Failed(cause) => write!(f, "failed: {cause}"),
        }
    }
}

/// Per-indicator outcome of a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalReport {
    statuses: BTreeMap<String, IndicatorStatus>,
}

impl RetrievalReport {
    fn set(&mut self, indicator: &str, status: IndicatorStatus) {
        self.statuses.insert(indicator.to_string(), status);
    }

    /// Status of one indicator.
    #[must_use]
    pub fn status(&self, indicator: &str) -> Option<&IndicatorStatus> {
        self.statuses.get(indicator)
    }

    /// Every indicator with its status, in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndicatorStatus)> {
        self.statuses.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn matching(&self, keep: impl Fn(&IndicatorStatus) -> bool) -> Vec<&str> {
        self.iter()
            .filter(|(_, s)| keep(s))
            .map(|(code, _)| code)
            .collect()
    }

    /// Indicators with data, fetched or cached.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.matching(IndicatorStatus::is_success)
    }

    /// Indicators without data.
    #[must_use]
    pub fn not_found(&self) -> Vec<&str> {
        self.matching(|s| *s == IndicatorStatus::NotFound)
    }

    /// Indicators whose dataflow failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.matching(|s| matches!(s, IndicatorStatus::Failed(_)))
    }

    /// Returns true if every indicator has data.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.statuses.values().all(IndicatorStatus::is_success)
    }
}

/// A shaped table with its per-indicator report.
#[derive(Clone, Debug, PartialEq)]
pub struct Retrieval {
    /// The shaped result.
    pub table: ResultTable,
    /// What happened to each indicator.
    pub report: RetrievalReport,
}

/// Everything gathered for one request before shaping.
#[derive(Debug, Default)]
struct Collected {
    rows: Vec<ObservationRow>,
    report: RetrievalReport,
    schemas: Vec<Arc<DataflowSchema>>,
    directory: Option<Arc<IndicatorDirectory>>,
    any_payload: bool,
    error: Option<UnicefError>,
    not_found: Option<UnicefError>,
}

impl Collected {
    fn record_error(&mut self, indicators: &BTreeSet<String>, error: UnicefError) {
        let status = if error.is_not_found() {
            IndicatorStatus::NotFound
        } else {
            IndicatorStatus::Failed(error.to_string())
        };
        for code in indicators {
            self.report.set(code, status.clone());
        }
        if error.is_not_found() {
            self.not_found.get_or_insert(error);
        } else {
            self.error.get_or_insert(error);
        }
    }
}

/// Builder for [`UnicefClient`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    store: Option<Arc<dyn ResponseStore>>,
    reference: Option<ReferenceTable>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.as_ref().map(|t| t.name()))
            .field("store", &self.store.as_ref().map(|_| "configured"))
            .field("reference", &self.reference.as_ref().map(ReferenceTable::fields))
            .finish()
    }
}

impl ClientBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport. Defaults to [`ReqwestTransport`].
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the response store. Defaults to [`InMemoryStore`].
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResponseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers per-country reference attributes for metadata joins.
    #[must_use]
    pub fn with_reference_table(mut self, reference: ReferenceTable) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    /// Returns an error if the default transport cannot be created.
    pub fn build(self) -> Result<UnicefClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        debug!(transport = transport.name(), base_url = %self.config.base_url, "building client");

        let fetcher = Arc::new(SdmxFetcher::new(self.config, transport, store));
        Ok(UnicefClient {
            metadata: MetadataCache::new(Arc::clone(&fetcher)),
            fetcher,
            reference: self.reference.map(Arc::new),
            builder: SdmxQueryBuilder::new(),
        })
    }
}

/// Client for the UNICEF SDMX data warehouse.
///
/// One request may name indicators from several dataflows. Each dataflow is
/// queried once, concurrently with the others; a failing dataflow does not
/// abort its siblings and is reported per indicator.
///
/// # Example
///
/// ```rust,no_run
/// use unicefdata::{RetrievalRequest, UnicefClient};
///
/// # async fn example() -> unicefdata::Result<()> {
/// let client = UnicefClient::new()?;
/// let request = RetrievalRequest::indicator("CME_MRY0T4")
///     .countries(["BGD", "IND", "PAK"])
///     .latest(true);
///
/// let retrieval = client.retrieve_with_report(&request).await?;
/// for (indicator, status) in retrieval.report.iter() {
///     println!("{indicator}: {status}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct UnicefClient {
    fetcher: Arc<SdmxFetcher>,
    metadata: MetadataCache,
    reference: Option<Arc<ReferenceTable>>,
    builder: SdmxQueryBuilder,
}

impl fmt::Debug for UnicefClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnicefClient")
            .field("base_url", &self.fetcher.config().base_url)
            .field("agency", &self.fetcher.config().agency)
            .field("metadata_entries", &self.metadata.len())
            .field("reference", &self.reference.as_ref().map(|r| r.fields()))
            .finish()
    }
}

impl UnicefClient {
    /// Creates a client with the default configuration, HTTP transport and
    /// in-memory response store.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Starts building a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.fetcher.config()
    }

    /// The metadata cache.
    #[must_use]
    pub const fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Retrieves, cleans and shapes data.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] for a malformed request,
    /// [`UnicefError::NotFound`] if the API has no data for any dataflow,
    /// and the first dataflow's error if every dataflow failed. A request
    /// whose filters leave no rows returns an empty table.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<ResultTable> {
        let (retrieval, not_found) = self.execute(request).await?;
        match not_found {
            Some(error) => Err(error),
            None => Ok(retrieval.table),
        }
    }

    /// Like [`UnicefClient::retrieve`], with a per-indicator report. A
    /// request for which the API has no data at all is not an error here;
    /// the report says [`IndicatorStatus::NotFound`].
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] for a malformed request, and the
    /// first dataflow's error if every dataflow failed.
    pub async fn retrieve_with_report(&self, request: &RetrievalRequest) -> Result<Retrieval> {
        self.execute(request).await.map(|(retrieval, _)| retrieval)
    }

    /// Retrieves decoded observations without year selection, cleaning or
    /// shaping.
    ///
    /// # Errors
    /// The same errors as [`UnicefClient::retrieve`].
    pub async fn raw_retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ObservationRow>> {
        let years = request.validate()?;
        let mut collected = self.collect(request, &years).await?;
        match collected.not_found.take() {
            Some(error) if !collected.any_payload => Err(error),
            _ => Ok(collected.rows),
        }
    }

    /// Converts observations to a long table with friendly column names.
    ///
    /// # Errors
    /// Returns an error only if a row cannot be added to the table.
    pub fn clean(&self, rows: &[ObservationRow]) -> Result<ResultTable> {
        ResultShaper::clean(rows)
    }

    /// Filters a cleaned table.
    ///
    /// # Errors
    /// Returns the errors of [`TableFilter::apply`].
    pub fn filter(&self, table: &ResultTable, filter: &TableFilter) -> Result<ResultTable> {
        filter.apply(table)
    }

    #[instrument(skip(self, request), fields(indicators = request.indicators.len()))]
    async fn execute(
        &self,
        request: &RetrievalRequest,
    ) -> Result<(Retrieval, Option<UnicefError>)> {
        let years = request.validate()?;
        MetadataJoin::new(request.metadata.iter().cloned())
            .with_reference(self.reference.clone())
            .validate()?;

        let mut collected = self.collect(request, &years).await?;
        let join = self.metadata_join(request, &collected);
        let shaper = ResultShaper::new()
            .with_years(years)
            .with_shape(request.shape)
            .with_dropna(request.dropna)
            .with_simplify(request.simplify)
            .with_metadata(join);
        let table = shaper.apply(std::mem::take(&mut collected.rows))?;

        info!(
            rows = table.height(),
            succeeded = collected.report.succeeded().len(),
            failed = collected.report.failed().len(),
            not_found = collected.report.not_found().len(),
            "retrieval complete"
        );
        let not_found = if collected.any_payload {
            None
        } else {
            collected.not_found.take()
        };
        Ok((
            Retrieval {
                table,
                report: collected.report,
            },
            not_found,
        ))
    }

    /// Routes, resolves and fetches every dataflow of a request.
    async fn collect(&self, request: &RetrievalRequest, years: &YearSelection) -> Result<Collected> {
        let wants_names = request.metadata.iter().any(|f| f == INDICATOR_NAME);
        let directory = if request.dataflow.is_none() || wants_names {
            Some(self.metadata.indicator_directory().await?)
        } else {
            None
        };
        let plan = plan(request, directory.as_deref())?;
        debug!(dataflows = plan.len(), "planned request");

        let mut collected = Collected {
            directory,
            ..Collected::default()
        };

        let schemas = join_all(plan.keys().map(|flow| self.metadata.schema(flow))).await;
        let mut loaded = Vec::with_capacity(plan.len());
        for ((flow, indicators), schema) in plan.iter().zip(schemas) {
            match schema {
                Ok(schema) => loaded.push((indicators, schema)),
                Err(e) => {
                    warn!(dataflow = %flow, error = %e, "dataflow schema unavailable");
                    collected.record_error(indicators, e);
                }
            }
        }

        if request.dataflow.is_some() {
            for (indicators, schema) in &loaded {
                check_published(schema, indicators)?;
            }
        }

        let siblings: Vec<&DataflowSchema> = loaded.iter().map(|(_, schema)| &**schema).collect();
        let mut queries = Vec::with_capacity(loaded.len());
        for (indicators, schema) in &loaded {
            let key = self.query(schema, indicators, request, years, &siblings)?;
            queries.push((*indicators, Arc::clone(schema), key));
        }

        let bypass = request.bypass_cache;
        let outcomes = join_all(queries.iter().map(|(_, schema, key)| async move {
            let decoder = ObservationDecoder::for_schema(schema);
            self.fetcher.fetch(key, &decoder, bypass).await
        }))
        .await;

        for ((indicators, schema, key), outcome) in queries.into_iter().zip(outcomes) {
            let flow = schema.dataflow.id.clone();
            match outcome {
                Ok(FetchOutcome::Rows { rows, cached }) => {
                    debug!(dataflow = %flow, rows = rows.len(), cached, "dataflow retrieved");
                    for code in indicators {
                        let status = if !rows.iter().any(|r| &r.indicator == code) {
                            IndicatorStatus::NotFound
                        } else if cached {
                            IndicatorStatus::Cached
                        } else {
                            IndicatorStatus::Success
                        };
                        collected.report.set(code, status);
                    }
                    collected.any_payload = true;
                    collected.rows.extend(rows);
                }
                Ok(FetchOutcome::NotFound) => {
                    debug!(dataflow = %flow, key = key.key(), "no data for query");
                    let error = UnicefError::NotFound {
                        dataflow: flow,
                        key: key.key().to_string(),
                    };
                    collected.record_error(indicators, error);
                }
                Err(e) => {
                    warn!(dataflow = %flow, error = %e, "dataflow failed, continuing with the rest");
                    collected.record_error(indicators, e);
                }
            }
            collected.schemas.push(schema);
        }

        if !collected.any_payload {
            if let Some(error) = collected.error.take() {
                return Err(error);
            }
        }
        Ok(collected)
    }

    /// Resolves filters and countries against a schema and builds the key.
    fn query(
        &self,
        schema: &DataflowSchema,
        indicators: &BTreeSet<String>,
        request: &RetrievalRequest,
        years: &YearSelection,
        siblings: &[&DataflowSchema],
    ) -> Result<QueryKey> {
        let translator = CodeTranslator::new(schema);
        let filters = translator.resolve_filters_among(&request.filters, siblings)?;
        let countries = if request.countries.is_empty() {
            BTreeSet::new()
        } else if schema.has_dimension(REF_AREA) {
            translator.resolve_values(REF_AREA, &request.countries)?
        } else {
            warn!(dataflow = %schema.dataflow.id, "dataflow has no country dimension, countries ignored");
            BTreeSet::new()
        };
        Ok(self
            .builder
            .build(schema, indicators, &countries, &filters, years))
    }

    fn metadata_join(&self, request: &RetrievalRequest, collected: &Collected) -> MetadataJoin {
        let join =
            MetadataJoin::new(request.metadata.iter().cloned()).with_reference(self.reference.clone());
        if request.metadata.is_empty() {
            return join;
        }

        let mut countries = BTreeMap::new();
        let mut indicators = BTreeMap::new();
        for schema in &collected.schemas {
            for (dimension, names) in [(REF_AREA, &mut countries), (INDICATOR, &mut indicators)] {
                if let Some(codelist) = schema.codelist(dimension) {
                    for code in &codelist.codes {
                        names
                            .entry(code.id.clone())
                            .or_insert_with(|| code.name.clone());
                    }
                }
            }
        }
        if let Some(directory) = &collected.directory {
            for info in directory.iter() {
                indicators.insert(info.code.clone(), info.name.clone());
            }
        }
        join.with_country_names(countries)
            .with_indicator_names(indicators)
    }

    /// Drops all cached metadata and stored responses. With `reload`, the
    /// indicator directory is fetched again before returning.
    ///
    /// # Errors
    /// Returns an error if the store cannot be cleared or the reload fails.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self, reload: bool) -> Result<()> {
        self.fetcher.clear().await?;
        if reload {
            self.metadata.reload().await?;
        } else {
            self.metadata.invalidate(&InvalidateScope::All);
        }
        info!(reload, "cache cleared");
        Ok(())
    }

    /// Combined summary of the metadata cache and the response store.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn cache_status(&self) -> Result<CacheStats> {
        let responses = self.fetcher.stats().await?;
        Ok(self.metadata.stats().merge(responses))
    }

    /// Removes stored responses older than the configured TTL.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn purge_stale(&self) -> Result<usize> {
        self.fetcher.purge_stale().await
    }

    /// Dataflows with their indicator counts.
    ///
    /// # Errors
    /// Returns an error if the indicator directory cannot be loaded.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self.metadata.indicator_directory().await?.categories())
    }

    /// Every indicator, or those of one dataflow.
    ///
    /// # Errors
    /// Returns an error if the indicator directory cannot be loaded.
    pub async fn list_indicators(&self, dataflow: Option<&str>) -> Result<Vec<IndicatorInfo>> {
        let directory = self.metadata.indicator_directory().await?;
        Ok(match dataflow {
            Some(flow) => directory.in_dataflow(flow).into_iter().cloned().collect(),
            None => directory.iter().cloned().collect(),
        })
    }

    /// Indicators whose code, name or description contains `keyword`.
    ///
    /// # Errors
    /// Returns an error if the indicator directory cannot be loaded.
    pub async fn search_indicators(&self, keyword: &str) -> Result<Vec<IndicatorInfo>> {
        let directory = self.metadata.indicator_directory().await?;
        Ok(directory.search(keyword).into_iter().cloned().collect())
    }

    /// Directory entry of one indicator.
    ///
    /// # Errors
    /// Returns [`UnicefError::NotFound`] for an unknown code.
    pub async fn get_indicator_info(&self, code: &str) -> Result<IndicatorInfo> {
        let directory = self.metadata.indicator_directory().await?;
        directory
            .get(code.trim())
            .cloned()
            .ok_or_else(|| UnicefError::NotFound {
                dataflow: INDICATOR_CODELIST.to_string(),
                key: code.to_string(),
            })
    }

    /// Schema of one dataflow.
    ///
    /// # Errors
    /// Returns [`UnicefError::NotFound`] for an unknown dataflow.
    pub async fn get_dataflow_schema(&self, dataflow: &str) -> Result<Arc<DataflowSchema>> {
        self.metadata.schema(dataflow).await
    }

    /// Every dataflow of the agency.
    ///
    /// # Errors
    /// Returns an error if the listing cannot be loaded.
    pub async fn list_dataflows(&self) -> Result<Vec<DataflowInfo>> {
        Ok(self.metadata.dataflows().await?.to_vec())
    }
}

/// Groups a request's indicators by the dataflow each is fetched from.
fn plan(
    request: &RetrievalRequest,
    directory: Option<&IndicatorDirectory>,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let routing = IndicatorDirectory::default();
    let directory = directory.unwrap_or(&routing);
    let mut plan: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for code in &request.indicators {
        let code = code.trim();
        let flow = directory.resolve_dataflow(code, request.dataflow.as_deref().map(str::trim))?;
        plan.entry(flow).or_default().insert(code.to_string());
    }
    Ok(plan)
}

/// Checks indicators against the codes a pinned dataflow publishes.
fn check_published(schema: &DataflowSchema, indicators: &BTreeSet<String>) -> Result<()> {
    let Some(codelist) = schema.codelist(INDICATOR) else {
        return Ok(());
    };
    let missing: Vec<&str> = indicators
        .iter()
        .map(String::as_str)
        .filter(|code| !codelist.contains(code))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let published: Vec<&str> = codelist.ids().take(MAX_SUGGESTIONS).collect();
    Err(UnicefError::validation(
        "indicator",
        format!(
            "unknown indicator '{}' for dataflow {}; published codes include: {}",
            missing.join("', '"),
            schema.dataflow.id,
            published.join(", ")
        ),
    ))
}
