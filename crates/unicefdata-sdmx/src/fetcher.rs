//! HTTP fetching with retry, backoff and a response cache.
//!
//! Every request, data or structure, goes through [`SdmxFetcher::request`]:
//! an explicit attempt loop that classifies each attempt as success,
//! not-found, transient or fatal. Data queries additionally go through the
//! response store, keyed by [`QueryKey::signature`], with concurrent fetches
//! of one signature coalesced into a single request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use unicefdata_cache::SingleFlight;
use unicefdata_core::{
    CacheStats, CachedPayload, ClientConfig, HttpResponse, HttpTransport, ObservationRow,
    PayloadFormat, QueryKey, ResponseStore, Result, TransportError, UnicefError,
};

use crate::decoder::ObservationDecoder;

/// Outcome of one HTTP request after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A 2xx body.
    Body(Vec<u8>),
    /// The server reported that nothing matches the request.
    NotFound,
}

/// Result of a data fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Decoded observations.
    Rows {
        /// Observations, in payload order.
        rows: Vec<ObservationRow>,
        /// True if the payload came from the response store.
        cached: bool,
    },
    /// The API has no series for the query.
    NotFound,
}

/// A single attempt, classified.
enum Attempt {
    Success(Vec<u8>),
    NotFound,
    Transient {
        cause: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

impl Attempt {
    fn classify(result: std::result::Result<HttpResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.is_success() => Self::Success(response.body),
            Ok(response) if response.status == 404 => Self::NotFound,
            Ok(response) if response.status == 429 || response.status >= 500 => Self::Transient {
                cause: format!("HTTP {}", response.status),
                retry_after: response.retry_after,
            },
            Ok(response) => Self::Fatal(format!(
                "HTTP {}: {}",
                response.status,
                snippet(&response.text())
            )),
            Err(e) if e.is_retryable() => Self::Transient {
                cause: e.to_string(),
                retry_after: None,
            },
            Err(e) => Self::Fatal(e.to_string()),
        }
    }
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map_or(text.len(), |(idx, _)| idx);
    text[..end].trim()
}

/// Decoded result shared between coalesced callers.
#[derive(Debug)]
enum Retrieved {
    Rows {
        rows: Vec<ObservationRow>,
        cached: bool,
    },
    NotFound,
}

/// Executes SDMX requests against the REST API.
#[derive(Debug)]
pub struct SdmxFetcher {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn ResponseStore>,
    in_flight: SingleFlight<(String, bool), Retrieved, UnicefError>,
}

impl SdmxFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn ResponseStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            in_flight: SingleFlight::new(),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The response store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResponseStore> {
        &self.store
    }

    /// Absolute URL for a path relative to the REST root.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    /// Absolute URL of a data query, with format parameters.
    #[must_use]
    pub fn data_url(&self, key: &QueryKey) -> String {
        let signature = key.signature();
        let sep = if signature.contains('?') { '&' } else { '?' };
        let format = self.config.data_format;
        let labels = match format {
            PayloadFormat::Csv => "&labels=id",
            PayloadFormat::Json => "",
        };
        format!(
            "{}{sep}format={}{labels}",
            self.url(&signature),
            format.query_param()
        )
    }

    /// Performs a GET with the configured retry policy.
    ///
    /// 404 is a definitive answer and is never retried. Timeouts, connection
    /// failures, 429 and 5xx are retried up to `max_retries` times with
    /// exponential backoff; any other status fails immediately.
    ///
    /// # Errors
    /// Returns [`UnicefError::Network`] with the attempt count and last cause.
    #[instrument(skip(self), fields(transport = self.transport.name()))]
    pub async fn request(&self, url: &str, accept: &str) -> Result<Response> {
        let headers = [("Accept", accept)];
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.config.timeout,
                self.transport.get(url, &headers, self.config.timeout),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout(self.config.timeout)));

            match Attempt::classify(result) {
                Attempt::Success(body) => {
                    debug!(attempt, bytes = body.len(), "request succeeded");
                    return Ok(Response::Body(body));
                }
                Attempt::NotFound => {
                    debug!(attempt, "request returned not found");
                    return Ok(Response::NotFound);
                }
                Attempt::Fatal(cause) => {
                    return Err(UnicefError::Network {
                        attempts: attempt,
                        cause,
                    });
                }
                Attempt::Transient { cause, retry_after } => {
                    if attempt >= max_attempts {
                        return Err(UnicefError::Network {
                            attempts: attempt,
                            cause,
                        });
                    }
                    let delay = self.config.backoff(attempt - 1, retry_after);
                    warn!(attempt, %cause, ?delay, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetches and decodes a data query.
    ///
    /// Serves from the response store unless `bypass_cache` is set or the
    /// entry is older than the configured TTL. Concurrent calls for the same
    /// signature share one request. A successful fetch replaces the stored
    /// entry; a bypassing fetch leaves other signatures untouched.
    ///
    /// # Errors
    /// Returns [`UnicefError::Network`] after retries are exhausted and
    /// [`UnicefError::MalformedPayload`] if the body does not decode.
    #[instrument(skip(self, key, decoder), fields(signature = %key))]
    pub async fn fetch(
        &self,
        key: &QueryKey,
        decoder: &ObservationDecoder,
        bypass_cache: bool,
    ) -> Result<FetchOutcome> {
        let signature = key.signature();
        let flight_key = (signature.clone(), bypass_cache);

        let retrieved = self
            .in_flight
            .coalesce(&flight_key, || {
                self.retrieve(key, &signature, decoder, bypass_cache)
            })
            .await?;

        Ok(match retrieved.as_ref() {
            Retrieved::NotFound => FetchOutcome::NotFound,
            Retrieved::Rows { rows, cached } => FetchOutcome::Rows {
                rows: rows.clone(),
                cached: *cached,
            },
        })
    }

    /// Store lookup, then network. A body is stored only once it decodes.
    async fn retrieve(
        &self,
        key: &QueryKey,
        signature: &str,
        decoder: &ObservationDecoder,
        bypass_cache: bool,
    ) -> Result<Retrieved> {
        if !bypass_cache {
            match self.store.get(signature).await? {
                Some(payload) if self.is_fresh(&payload) => {
                    let rows = decoder.decode(&payload.body, payload.format)?;
                    debug!(rows = rows.len(), "response cache hit");
                    return Ok(Retrieved::Rows { rows, cached: true });
                }
                Some(payload) => debug!(age = ?payload.age(), "cached response is stale"),
                None => debug!("response cache miss"),
            }
        }

        let format = self.config.data_format;
        match self.request(&self.data_url(key), format.accept()).await? {
            Response::NotFound => Ok(Retrieved::NotFound),
            Response::Body(body) => {
                let rows = decoder.decode(&body, format)?;
                debug!(rows = rows.len(), "decoded response");
                self.store
                    .put(CachedPayload::new(signature, format, body))
                    .await?;
                Ok(Retrieved::Rows {
                    rows,
                    cached: false,
                })
            }
        }
    }

    fn is_fresh(&self, payload: &CachedPayload) -> bool {
        self.config
            .cache_ttl
            .is_none_or(|ttl| !payload.is_stale(ttl))
    }

    /// Removes every stored response.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Removes stored responses older than the configured TTL. Returns the
    /// number removed; without a TTL nothing is stale.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn purge_stale(&self) -> Result<usize> {
        match self.config.cache_ttl {
            Some(ttl) => self.store.invalidate_stale(ttl).await,
            None => Ok(0),
        }
    }

    /// Summary of the response store.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixtures::CME_CSV;
    use crate::mock::{MockTransport, Reply};
    use unicefdata_cache::InMemoryStore;
    use unicefdata_core::DataflowRef;

    fn config() -> ClientConfig {
        ClientConfig::new()
            .with_base_url("http://sdmx.test/rest")
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .with_timeout(Duration::from_millis(200))
    }

    fn fetcher(transport: MockTransport) -> (Arc<MockTransport>, SdmxFetcher) {
        let transport = Arc::new(transport);
        let fetcher = SdmxFetcher::new(
            config(),
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::new(InMemoryStore::new()),
        );
        (transport, fetcher)
    }

    fn cme_key() -> QueryKey {
        QueryKey::new(
            DataflowRef::new("UNICEF", "CME", "1.0"),
            "BRA+IND.CME_MRY0T4._T.",
            Some((2015, 2017)),
        )
    }

    #[test]
    fn test_data_url() {
        let (_, fetcher) = fetcher(MockTransport::new());
        assert_eq!(
            fetcher.data_url(&cme_key()),
            "http://sdmx.test/rest/data/UNICEF,CME,1.0/BRA+IND.CME_MRY0T4._T.?startPeriod=2015&endPeriod=2017&format=csv&labels=id"
        );
        let open = QueryKey::new(DataflowRef::new("UNICEF", "CME", "1.0"), ".CME_MRY0T4._T.", None);
        assert!(fetcher.data_url(&open).ends_with("/.CME_MRY0T4._T.?format=csv&labels=id"));
    }

    #[tokio::test]
    async fn test_fetch_then_serve_from_cache() {
        let (transport, fetcher) = fetcher(MockTransport::new().ok("data/UNICEF,CME", CME_CSV));
        let decoder = ObservationDecoder::new("CME");

        let first = fetcher.fetch(&cme_key(), &decoder, false).await.unwrap();
        let FetchOutcome::Rows { rows, cached } = first else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 5);
        assert!(!cached);

        let second = fetcher.fetch(&cme_key(), &decoder, false).await.unwrap();
        assert!(matches!(second, FetchOutcome::Rows { cached: true, .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bypass_refetches_and_overwrites() {
        let (transport, fetcher) = fetcher(MockTransport::new().ok("data/UNICEF,CME", CME_CSV));
        let decoder = ObservationDecoder::new("CME");

        fetcher.fetch(&cme_key(), &decoder, false).await.unwrap();
        let bypassed = fetcher.fetch(&cme_key(), &decoder, true).await.unwrap();
        assert!(matches!(bypassed, FetchOutcome::Rows { cached: false, .. }));
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(fetcher.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (transport, fetcher) = fetcher(
            MockTransport::new().route("data/", vec![Reply::Ok(404, "NoResultsFound".into())]),
        );
        let outcome = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NotFound);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(fetcher.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (transport, fetcher) = fetcher(MockTransport::new().route(
            "data/",
            vec![
                Reply::Ok(503, String::new()),
                Reply::Fail(TransportError::Connect("reset by peer".into())),
                Reply::RetryAfter(429, Duration::from_millis(2)),
                Reply::Ok(200, CME_CSV.into()),
            ],
        ));
        let outcome = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Rows { .. }));
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_attempts_and_cause() {
        let (transport, fetcher) =
            fetcher(MockTransport::new().route("data/", vec![Reply::Ok(502, String::new())]));
        let err = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap_err();
        match err {
            UnicefError::Network { attempts, cause } => {
                assert_eq!(attempts, 4);
                assert_eq!(cause, "HTTP 502");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let (transport, fetcher) = fetcher(
            MockTransport::new().route("data/", vec![Reply::Hang, Reply::Ok(200, CME_CSV.into())]),
        );
        let outcome = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Rows { .. }));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let (transport, fetcher) = fetcher(
            MockTransport::new().route("data/", vec![Reply::Ok(400, "Syntax error in key".into())]),
        );
        let err = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 400: Syntax error in key"));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retried() {
        let (transport, fetcher) =
            fetcher(MockTransport::new().ok("data/", "REF_AREA,TIME_PERIOD\nBRA,2015\n"));
        let err = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, UnicefError::MalformedPayload(_)));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(fetcher.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let (transport, fetcher) = fetcher(
            MockTransport::new()
                .with_latency(Duration::from_millis(30))
                .ok("data/UNICEF,CME", CME_CSV),
        );
        let fetcher = Arc::new(fetcher);
        let decoder = ObservationDecoder::new("CME");

        let key = cme_key();
        let fetches = (0..6).map(|_| fetcher.fetch(&key, &decoder, false));
        let outcomes = futures::future::join_all(fetches).await;

        assert!(outcomes.iter().all(|o| matches!(o, Ok(FetchOutcome::Rows { .. }))));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let transport = Arc::new(MockTransport::new().ok("data/", CME_CSV));
        let store = Arc::new(InMemoryStore::new());
        let mut stale = CachedPayload::new(cme_key().signature(), PayloadFormat::Csv, CME_CSV.into());
        stale.fetched_at -= chrono::Duration::hours(2);
        store.put(stale).await.unwrap();

        let fetcher = SdmxFetcher::new(
            config().with_cache_ttl(Duration::from_secs(3600)),
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            store,
        );
        let outcome = fetcher
            .fetch(&cme_key(), &ObservationDecoder::new("CME"), false)
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Rows { cached: false, .. }));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(fetcher.purge_stale().await.unwrap(), 0);
    }
}
