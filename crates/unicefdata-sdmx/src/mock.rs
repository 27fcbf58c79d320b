//! Scripted transport for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use unicefdata_core::{HttpResponse, HttpTransport, TransportError};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(u16, String),
    RetryAfter(u16, Duration),
    Fail(TransportError),
    Hang,
}

#[derive(Debug)]
struct Route {
    pattern: String,
    replies: Vec<Reply>,
    served: usize,
}

/// Answers each URL with the replies scripted for the first route whose
/// pattern it contains. Replies are served in order; the last one repeats.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn route(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            pattern: pattern.to_string(),
            replies,
            served: 0,
        });
        self
    }

    pub(crate) fn ok(self, pattern: &str, body: &str) -> Self {
        self.route(pattern, vec![Reply::Ok(200, body.to_string())])
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|u| u.contains(pattern)).count()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.pattern)) else {
            return Reply::Ok(404, "NoResultsFound".to_string());
        };
        let idx = route.served.min(route.replies.len() - 1);
        route.served += 1;
        route.replies[idx].clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let reply = self.next_reply(url);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match reply {
            Reply::Ok(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::RetryAfter(status, delay) => Ok(HttpResponse {
                status,
                body: Vec::new(),
                retry_after: Some(delay),
            }),
            Reply::Fail(err) => Err(err),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(HttpResponse::new(200, ""))
            }
        }
    }
}
