//! Transport trait for issuing HTTP GET requests.
//!
//! The SDMX layer talks to the network only through [`HttpTransport`], so
//! tests and alternative clients can stand in for the real HTTP stack.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// A completed HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Server-suggested delay before retrying, from `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Creates a response without a retry hint.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as lossy UTF-8, for error messages.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Base trait for HTTP transports.
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    /// Returns the name of this transport.
    fn name(&self) -> &str;

    /// Performs a GET request.
    ///
    /// Any status code is a successful exchange; only failures to obtain a
    /// response are errors.
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}
