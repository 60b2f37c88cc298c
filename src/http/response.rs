//! Outbound response pipeline.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from the backend answer
//! - Point URL-valued headers (`Location`, ...) back through the gateway
//! - Rewrite JSON bodies the dispatch contract names, streaming everything else
//!
//! # Design Decisions
//! - Outbound rules are those of the target that actually answered
//! - Compressed bodies are never decoded; they stream through unmodified
//! - A rewritten body gets a fresh `Content-Length`

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;

use crate::deploy::DispatchDescriptor;
use crate::dispatch::headers::{rewrite_url_headers, strip_hop_by_hop};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::http::GatewayError;
use crate::rewrite::{Direction, RewriteContext};

/// Turn a backend answer into the client response.
pub async fn finish(
    dispatcher: &Dispatcher,
    service: &DispatchDescriptor,
    dispatched: Dispatched<'_>,
    method: &Method,
    ctx: &RewriteContext,
) -> Result<Response, GatewayError> {
    let contract = service.contract();
    let rules = &dispatched.target.rules;
    let (mut parts, body) = dispatched.response.into_parts();

    strip_hop_by_hop(&mut parts.headers);
    rewrite_url_headers(
        &mut parts.headers,
        &contract.outbound_headers,
        &contract.query_params,
        Direction::Outbound,
        rules,
        ctx,
    )?;

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let filter = contract.content_filter(Direction::Outbound, content_type);

    let Some(filter) = filter else {
        return Ok(Response::from_parts(parts, Body::new(body)));
    };
    if !has_body(method, parts.status) {
        return Ok(Response::from_parts(parts, Body::new(body)));
    }
    if is_encoded(&parts.headers) {
        tracing::warn!(
            service = %service.role,
            encoding = ?parts.headers.get(CONTENT_ENCODING),
            "Compressed response body cannot be rewritten; streaming unchanged"
        );
        return Ok(Response::from_parts(parts, Body::new(body)));
    }

    let buffered = dispatcher.buffer_response(body).await?;
    let out = match filter.rewrite_body(&buffered, rules, ctx)? {
        Some(rewritten) => Bytes::from(rewritten),
        None => buffered,
    };
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(out.len()));
    Ok(Response::from_parts(parts, Body::from(out)))
}

fn has_body(method: &Method, status: StatusCode) -> bool {
    method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"))
}
