//! Mock transport for testing
//!
//! Provides a scripted implementation of [`Transport`] so the request
//! pipeline and session manager can be tested without real API calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::transport::{Transport, TransportRequest};
use crate::error::ApiError;

/// A scripted reply for one attempt
#[derive(Clone)]
pub enum MockReply {
    /// Succeed with this body
    Json(Value),
    /// Fail with this error
    Error(ApiError),
    /// Wait, then reply
    Delay(Duration, Box<MockReply>),
    /// Wait until the gate is opened, then reply
    Gate(Arc<Notify>, Box<MockReply>),
    /// Never reply
    Hang,
}

impl MockReply {
    pub fn status(status: u16, message: &str) -> Self {
        MockReply::Error(ApiError::Status {
            status,
            message: message.to_string(),
        })
    }

    pub fn delayed(self, delay: Duration) -> Self {
        MockReply::Delay(delay, Box::new(self))
    }

    pub fn gated(self, gate: &Arc<Notify>) -> Self {
        MockReply::Gate(Arc::clone(gate), Box::new(self))
    }
}

/// A captured request for test assertions
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub url: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Value>,
    pub at: Instant,
}

struct Route {
    method: Method,
    path: String,
    replies: Vec<MockReply>,
}

/// Mock transport.
///
/// Configure replies per route via builder methods. Each route replays its
/// replies in order and keeps repeating the last one.
///
/// # Example
/// ```ignore
/// let mock = MockTransport::new()
///     .on(Method::GET, "/projects", MockReply::Json(json!([])))
///     .await;
/// ```
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    captured: Mutex<Vec<CapturedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for requests whose URL ends with `path`.
    pub async fn on(self, method: Method, path: &str, reply: MockReply) -> Self {
        {
            let mut routes = self.routes.lock().await;
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.path == path)
            {
                Some(route) => route.replies.push(reply),
                None => routes.push(Route {
                    method,
                    path: path.to_string(),
                    replies: vec![reply],
                }),
            }
        }
        self
    }

    /// All captured requests, in arrival order
    pub async fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }

    /// Number of requests that reached the transport
    pub async fn call_count(&self) -> usize {
        self.captured.lock().await.len()
    }

    /// Number of requests to one route
    pub async fn calls_to(&self, method: Method, path: &str) -> usize {
        self.captured
            .lock()
            .await
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(path))
            .count()
    }

    async fn next_reply(&self, request: &TransportRequest) -> MockReply {
        let mut routes = self.routes.lock().await;
        let route = routes
            .iter_mut()
            .find(|r| r.method == request.method && request.url.ends_with(&r.path));

        match route {
            Some(route) if route.replies.len() > 1 => route.replies.remove(0),
            Some(route) => route.replies[0].clone(),
            None => MockReply::status(404, "No mock route"),
        }
    }
}

async fn resolve(mut reply: MockReply) -> Result<Value, ApiError> {
    loop {
        reply = match reply {
            MockReply::Json(value) => return Ok(value),
            MockReply::Error(err) => return Err(err),
            MockReply::Delay(delay, next) => {
                tokio::time::sleep(delay).await;
                *next
            }
            MockReply::Gate(gate, next) => {
                gate.notified().await;
                *next
            }
            MockReply::Hang => std::future::pending().await,
        };
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &TransportRequest) -> Result<Value, ApiError> {
        let header = |name: reqwest::header::HeaderName| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.captured.lock().await.push(CapturedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            authorization: header(reqwest::header::AUTHORIZATION),
            content_type: header(reqwest::header::CONTENT_TYPE),
            body: request.body.clone(),
            at: Instant::now(),
        });

        let reply = self.next_reply(request).await;
        resolve(reply).await
    }
}
