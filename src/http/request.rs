//! Inbound request parsing and preparation.
//!
//! # Responsibilities
//! - Split the request path into topology name and service-relative path
//! - Derive the client-facing topology URL that outbound rules point back to
//! - Apply the dispatch contract's inbound header, identity and body policy
//!
//! # Design Decisions
//! - Path segments stay percent-encoded; the backend sees what the client sent
//! - Inbound header and body rules come from the service's first target;
//!   only the target URL is recomputed per failover attempt

use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, Method, Uri};

use crate::config::GatewaySettings;
use crate::deploy::DispatchDescriptor;
use crate::dispatch::headers::{
    add_forwarded, apply_identity, request_identity_encoding, rewrite_url_headers,
    strip_hop_by_hop, Forwarded, X_FORWARDED_HOST, X_FORWARDED_PROTO,
};
use crate::dispatch::OutboundRequest;
use crate::http::GatewayError;
use crate::rewrite::{Direction, RewriteContext};

/// A request path below the gateway mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPath {
    pub topology: String,
    /// Segments after the topology name, still percent-encoded.
    pub segments: Vec<String>,
    pub trailing_slash: bool,
    pub query: Option<String>,
}

impl GatewayPath {
    /// Parse `/<mount>/<topology>/<rest...>`; `None` when `uri` is elsewhere.
    pub fn parse(mount: &str, uri: &Uri) -> Option<Self> {
        let rest = uri.path().strip_prefix('/')?;
        let (head, rest) = rest.split_once('/').unwrap_or((rest, ""));
        if head != mount.trim_matches('/') {
            return None;
        }
        let (topology, rest) = rest.split_once('/').unwrap_or((rest, ""));
        if topology.is_empty() {
            return None;
        }

        Some(Self {
            topology: topology.to_string(),
            segments: rest
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            trailing_slash: !rest.is_empty() && rest.ends_with('/'),
            query: uri.query().map(str::to_string),
        })
    }

    /// Service-relative path for the segments left after a service prefix.
    pub fn relative(&self, remaining: &[&str]) -> String {
        let mut out = String::new();
        for segment in remaining {
            out.push('/');
            out.push_str(segment);
        }
        if self.trailing_slash {
            out.push('/');
        }
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        out
    }

    /// The full client-facing URL of this request.
    pub fn subject(&self, frontend_url: &str) -> String {
        let all: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        format!("{}{}", frontend_url.trim_end_matches('/'), self.relative(&all))
    }
}

/// Client-facing base URL of `topology`, e.g. `https://gw:8443/gateway/sandbox`.
///
/// A configured `frontend_url` wins; otherwise the scheme and authority come
/// from `X-Forwarded-Proto`/`X-Forwarded-Host`, falling back to `Host` and
/// then the request URI's authority (HTTP/2 `:authority`).
pub fn frontend_url(
    settings: &GatewaySettings,
    headers: &HeaderMap,
    uri: &Uri,
    topology: &str,
) -> String {
    let base = match &settings.frontend_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let proto = first_value(headers, X_FORWARDED_PROTO)
                .or_else(|| uri.scheme_str())
                .unwrap_or("http");
            let host = first_value(headers, X_FORWARDED_HOST)
                .or_else(|| first_value(headers, HOST.as_str()))
                .or_else(|| uri.authority().map(|a| a.as_str()))
                .unwrap_or("localhost");
            format!("{}://{}", proto, host)
        }
    };
    format!("{}/{}/{}", base, settings.path.trim_matches('/'), topology)
}

fn first_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Everything about the client request the inbound pipeline needs.
pub struct Inbound<'a> {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub principal: Option<&'a str>,
}

/// Apply the service's inbound policy and produce the request to dispatch.
pub fn prepare_outbound(
    service: &DispatchDescriptor,
    path: &GatewayPath,
    remaining: &[&str],
    inbound: Inbound<'_>,
    ctx: &RewriteContext,
) -> Result<OutboundRequest, GatewayError> {
    let contract = service.contract();
    let Inbound {
        method,
        mut headers,
        mut body,
        client_ip,
        principal,
    } = inbound;

    let frontend = ctx.frontend_url.as_deref().unwrap_or_default();
    let client_host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    strip_hop_by_hop(&mut headers);
    apply_identity(&mut headers, &contract.identity, principal);
    add_forwarded(
        &mut headers,
        &Forwarded {
            client_ip,
            proto: frontend.split_once("://").map_or("http", |(scheme, _)| scheme),
            host: client_host.as_deref(),
            context: ctx.frontend_path.as_deref().unwrap_or_default(),
        },
    );

    if let Some(primary) = service.targets.first() {
        rewrite_url_headers(
            &mut headers,
            &contract.inbound_headers,
            &contract.query_params,
            Direction::Inbound,
            &primary.rules,
            ctx,
        )?;

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if let Some(filter) = contract.content_filter(Direction::Inbound, content_type) {
            if let Some(rewritten) = filter.rewrite_body(&body, &primary.rules, ctx)? {
                body = Bytes::from(rewritten);
            }
        }
    }

    if contract
        .content
        .iter()
        .any(|f| f.direction == Direction::Outbound)
    {
        request_identity_encoding(&mut headers);
    }

    Ok(OutboundRequest {
        method,
        headers,
        body,
        subject: path.subject(frontend),
        relative: path.relative(remaining),
    })
}
