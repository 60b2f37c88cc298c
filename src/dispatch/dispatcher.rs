//! Backend dispatch with failover.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, Uri};
use hyper::body::Incoming;

use crate::config::DispatchConfig;
use crate::deploy::{BoundTarget, DispatchDescriptor};
use crate::dispatch::body::{collect_limited, BodyError};
use crate::dispatch::client::{BackendClient, SendError};
use crate::dispatch::headers::set_host;
use crate::dispatch::DispatchError;
use crate::observability::metrics;
use crate::resilience::{is_retryable, with_deadline, RetryPolicy};
use crate::rewrite::{rewrite_query_values, Direction, RewriteContext, Scope};
use crate::services::DispatchContract;

/// A client request after inbound header and body policy, ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Client-facing URL, the subject of inbound URL rules.
    pub subject: String,
    /// Path below the service prefix plus query, e.g. `/v1/clusters?fields=a`.
    pub relative: String,
}

/// A backend answer and the target that produced it.
pub struct Dispatched<'a> {
    pub response: Response<Incoming>,
    pub target: &'a BoundTarget,
    pub target_url: String,
    pub attempts: u32,
}

/// Executes backend calls under timeout, retry and failover policy.
pub struct Dispatcher {
    client: BackendClient,
    retries: RetryPolicy,
    max_buffered_response: usize,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig, retries: RetryPolicy) -> Self {
        Self {
            client: BackendClient::new(config),
            retries,
            max_buffered_response: config.max_buffered_response_bytes,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.client.request_timeout()
    }

    /// Send `request` to the service, failing over between its targets.
    ///
    /// Connection failures of idempotent requests move on to the next target
    /// after a backoff; any backend status, 5xx included, is returned as is.
    pub async fn dispatch<'a>(
        &self,
        service: &'a DispatchDescriptor,
        request: &OutboundRequest,
        ctx: &RewriteContext,
    ) -> Result<Dispatched<'a>, DispatchError> {
        let order = service.failover_order();
        if order.is_empty() {
            return Err(DispatchError::NoTargets);
        }
        let max_attempts = self.retries.attempts_for(&request.method);
        let mut attempt: u32 = 0;

        loop {
            let target = order[attempt as usize % order.len()];
            attempt += 1;

            let url = target_url(target, service.contract(), request, ctx)?;
            let backend_request = build_request(request, &url)?;
            tracing::debug!(
                service = %service.role,
                target = %url,
                attempt,
                "Dispatching to backend"
            );

            match self.client.send(backend_request).await {
                Ok(response) => {
                    return Ok(Dispatched {
                        response,
                        target,
                        target_url: url,
                        attempts: attempt,
                    })
                }
                Err(SendError::Connect(reason))
                    if attempt < max_attempts && is_retryable(&request.method, true) =>
                {
                    let delay = self.retries.delay(attempt);
                    tracing::warn!(
                        service = %service.role,
                        target = %url,
                        attempt,
                        delay = ?delay,
                        error = %reason,
                        "Backend unreachable, retrying"
                    );
                    metrics::record_retry(&service.role);
                    tokio::time::sleep(delay).await;
                }
                Err(SendError::Connect(reason)) | Err(SendError::Transport(reason)) => {
                    return Err(DispatchError::Unreachable { target: url, reason })
                }
                Err(SendError::Timeout(timeout)) => {
                    return Err(DispatchError::Timeout { target: url, timeout })
                }
            }
        }
    }

    /// Buffer a backend body for rewriting, bounded in size and time.
    pub async fn buffer_response(&self, body: Incoming) -> Result<Bytes, DispatchError> {
        let limit = self.max_buffered_response;
        match with_deadline(self.request_timeout(), collect_limited(Body::new(body), limit)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(BodyError::TooLarge { limit })) => {
                Err(DispatchError::ResponseTooLarge { limit })
            }
            Ok(Err(BodyError::Read(reason))) => Err(DispatchError::Body(reason)),
            Err(elapsed) => Err(DispatchError::Timeout {
                target: "response body".into(),
                timeout: elapsed.0,
            }),
        }
    }
}

/// Backend URL for `request` on `target`.
///
/// The first matching inbound URL rule decides; without one the request is
/// forwarded to the target base URL with its service-relative path.
pub fn target_url(
    target: &BoundTarget,
    contract: &DispatchContract,
    request: &OutboundRequest,
    ctx: &RewriteContext,
) -> Result<String, DispatchError> {
    let url = match target
        .rules
        .apply(Direction::Inbound, Scope::Url, &request.subject, ctx)?
    {
        Some(url) => url,
        None => default_target(target.base_url.as_str(), &request.relative),
    };
    Ok(rewrite_query_values(
        Direction::Inbound,
        &target.rules,
        &contract.query_params,
        &url,
        ctx,
    )?)
}

fn default_target(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    if relative.is_empty() || relative.starts_with('?') {
        format!("{}/{}", base, relative)
    } else {
        format!("{}{}", base, relative)
    }
}

fn build_request(request: &OutboundRequest, url: &str) -> Result<Request<Body>, DispatchError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| DispatchError::InvalidTarget {
            url: url.to_string(),
            reason: format!("{}", e),
        })?;

    let mut headers = request.headers.clone();
    if let Some(authority) = uri.authority() {
        set_host(&mut headers, authority.as_str());
    }
    headers.remove(CONTENT_LENGTH);
    if !request.body.is_empty() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(request.body.len()));
    }

    let mut backend_request = Request::builder()
        .method(request.method.clone())
        .uri(uri)
        .body(Body::from(request.body.clone()))
        .map_err(|e| DispatchError::InvalidTarget {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    *backend_request.headers_mut() = headers;
    Ok(backend_request)
}
