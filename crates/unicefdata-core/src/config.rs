//! Client configuration.
//!
//! [`ClientConfig`] collects the endpoint, retry and cache settings shared by
//! the fetcher and the metadata cache.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// UNICEF SDMX REST root.
pub const DEFAULT_BASE_URL: &str = "https://sdmx.data.unicef.org/ws/public/sdmxapi/rest";

/// Maintenance agency of the UNICEF dataflows.
pub const DEFAULT_AGENCY: &str = "UNICEF";

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("unicefdata-rs/", env!("CARGO_PKG_VERSION"));

/// Wire format requested for data queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// SDMX-CSV, one observation per line.
    #[default]
    Csv,
    /// SDMX-JSON data message (series/observation hierarchy).
    Json,
}

impl PayloadFormat {
    /// Value of the `format` query parameter.
    #[must_use]
    pub const fn query_param(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "sdmx-json",
        }
    }

    /// Value of the `Accept` header.
    #[must_use]
    pub const fn accept(&self) -> &'static str {
        match self {
            Self::Csv => "application/vnd.sdmx.data+csv;version=1.0.0",
            Self::Json => "application/vnd.sdmx.data+json;version=1.0.0",
        }
    }

    /// Short tag used when persisting payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Inverse of [`PayloadFormat::as_str`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every component that talks to the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// REST root, without a trailing slash.
    pub base_url: String,
    /// Maintenance agency.
    pub agency: String,
    /// Retries after the first attempt on transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_backoff: Duration,
    /// Upper bound on a single backoff delay.
    pub max_backoff: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent header.
    pub user_agent: String,
    /// Wire format for data queries.
    pub data_format: PayloadFormat,
    /// Age after which cached responses count as misses.
    pub cache_ttl: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            agency: DEFAULT_AGENCY.to_string(),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            data_format: PayloadFormat::Csv,
            cache_ttl: None,
        }
    }
}

impl ClientConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the REST root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base and maximum backoff delays.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the wire format for data queries.
    #[must_use]
    pub const fn with_data_format(mut self, format: PayloadFormat) -> Self {
        self.data_format = format;
        self
    }

    /// Sets the response cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Backoff before retry number `retry` (zero-based): `base * 2^retry`,
    /// capped at `max_backoff`, or the server's hint when it is longer.
    #[must_use]
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32 << retry.min(16);
        let delay = self.base_backoff.saturating_mul(factor).min(self.max_backoff);
        hint.map_or(delay, |h| h.max(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ClientConfig::new()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(700));
        assert_eq!(config.backoff(0, None), Duration::from_millis(100));
        assert_eq!(config.backoff(1, None), Duration::from_millis(200));
        assert_eq!(config.backoff(2, None), Duration::from_millis(400));
        assert_eq!(config.backoff(3, None), Duration::from_millis(700));
        assert_eq!(config.backoff(40, None), Duration::from_millis(700));
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = ClientConfig::new()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(
            config.backoff(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ClientConfig::new().with_base_url("http://localhost:8080/rest/");
        assert_eq!(config.base_url, "http://localhost:8080/rest");
    }

    #[test]
    fn test_payload_format_tags() {
        for format in [PayloadFormat::Csv, PayloadFormat::Json] {
            assert_eq!(PayloadFormat::from_tag(format.as_str()), Some(format));
        }
        assert_eq!(PayloadFormat::from_tag("xml"), None);
    }
}
