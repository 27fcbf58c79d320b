//! Error types for UNICEF data operations.
//!
//! [`UnicefError`] is the single error taxonomy surfaced to callers. An empty
//! result is not an error: it is a zero-row [`ResultTable`](crate::ResultTable).

use std::time::Duration;

use thiserror::Error;

/// A single-attempt transport failure, before any retry policy is applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other failure raised by the HTTP client.
    #[error("http client error: {0}")]
    Http(String),
}

impl TransportError {
    /// Returns true if a retry may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }
}

/// Errors that can occur while resolving, fetching or shaping UNICEF data.
#[derive(Error, Debug, Clone)]
pub enum UnicefError {
    /// The request is malformed. Always local, never retried.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The request field that failed validation.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The API reports that no series exists for a valid query.
    #[error("no data found for {dataflow} with key '{key}'")]
    NotFound {
        /// Dataflow that was queried.
        dataflow: String,
        /// SDMX key that was queried.
        key: String,
    },

    /// Transport failure, or retries exhausted.
    #[error("network error after {attempts} attempt(s): {cause}")]
    Network {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying cause.
        cause: String,
    },

    /// A response could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Error interacting with a response store.
    #[error("cache error: {0}")]
    Cache(String),

    /// Single-attempt transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl UnicefError {
    /// Shorthand for a [`UnicefError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the fetch loop should retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for a not-found outcome.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias using [`UnicefError`].
pub type Result<T> = std::result::Result<T, UnicefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_names_field() {
        let err = UnicefError::validation("year", "malformed year token 'abc'");
        assert_eq!(err.to_string(), "invalid year: malformed year token 'abc'");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(UnicefError::from(TransportError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(UnicefError::from(TransportError::Connect("reset".into())).is_retryable());
        assert!(!UnicefError::from(TransportError::Http("bad url".into())).is_retryable());
        assert!(!UnicefError::MalformedPayload("x".into()).is_retryable());
        assert!(!UnicefError::validation("sex", "unknown code").is_retryable());
    }

    #[test]
    fn test_network_error_carries_attempts() {
        let err = UnicefError::Network {
            attempts: 4,
            cause: "HTTP 503".into(),
        };
        assert!(err.to_string().contains("4 attempt"));
        assert!(err.to_string().contains("HTTP 503"));
    }
}
