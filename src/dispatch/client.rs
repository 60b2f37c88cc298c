//! Pooled HTTP client for backend calls.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::DispatchConfig;
use crate::resilience::with_deadline;

/// How a single backend call failed.
#[derive(Debug)]
pub enum SendError {
    /// No connection could be established; safe to retry elsewhere.
    Connect(String),
    /// The connection broke after the request may have been sent.
    Transport(String),
    /// No response head within the request deadline.
    Timeout(Duration),
}

/// Shared client with connect and request deadlines.
#[derive(Clone)]
pub struct BackendClient {
    inner: Client<HttpConnector, Body>,
    request_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &DispatchConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        connector.set_nodelay(true);

        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            inner,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send one request and wait for the response head.
    ///
    /// Dropping the returned future abandons the backend call.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Incoming>, SendError> {
        match with_deadline(self.request_timeout, self.inner.request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_connect() => Err(SendError::Connect(describe(&e))),
            Ok(Err(e)) => Err(SendError::Transport(describe(&e))),
            Err(elapsed) => Err(SendError::Timeout(elapsed.0)),
        }
    }
}

/// Error text followed by its source chain.
fn describe(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
