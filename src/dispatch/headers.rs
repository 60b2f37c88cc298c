//! Header policy for forwarded requests and responses.

use std::net::IpAddr;

use axum::http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, COOKIE, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::rewrite::{rewrite_query_values, Direction, RewriteContext, RewriteError, RuleSet, Scope};
use crate::services::IdentityPolicy;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_CONTEXT: &str = "x-forwarded-context";

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    for name in listed {
        headers.remove(name.as_str());
    }
}

/// Apply a dispatch contract's credential policy.
pub fn apply_identity(headers: &mut HeaderMap, policy: &IdentityPolicy, principal: Option<&str>) {
    match policy {
        IdentityPolicy::PassThrough => {}
        IdentityPolicy::Strip => {
            headers.remove(AUTHORIZATION);
            headers.remove(COOKIE);
        }
        IdentityPolicy::Substitute { header } => {
            headers.remove(AUTHORIZATION);
            headers.remove(COOKIE);
            let Ok(name) = HeaderName::from_bytes(header.as_bytes()) else {
                return;
            };
            // Never forward a client-supplied identity.
            headers.remove(&name);
            if let Some(value) = principal.and_then(|p| HeaderValue::from_str(p).ok()) {
                headers.insert(name, value);
            }
        }
    }
}

/// Client-side facts recorded in `X-Forwarded-*` headers.
#[derive(Debug, Clone)]
pub struct Forwarded<'a> {
    pub client_ip: Option<IpAddr>,
    pub proto: &'a str,
    pub host: Option<&'a str>,
    /// Gateway path of the topology, e.g. `/gateway/sandbox`.
    pub context: &'a str,
}

/// Add `X-Forwarded-*` headers, extending any set by upstream proxies.
pub fn add_forwarded(headers: &mut HeaderMap, forwarded: &Forwarded<'_>) {
    if let Some(ip) = forwarded.client_ip {
        let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if !headers.contains_key(X_FORWARDED_PROTO) {
        if let Ok(value) = HeaderValue::from_str(forwarded.proto) {
            headers.insert(X_FORWARDED_PROTO, value);
        }
    }
    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(value) = forwarded.host.and_then(|h| HeaderValue::from_str(h).ok()) {
            headers.insert(X_FORWARDED_HOST, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(forwarded.context) {
        headers.insert(X_FORWARDED_CONTEXT, value);
    }
}

/// Ask for an uncompressed response so its body can be rewritten.
pub fn request_identity_encoding(headers: &mut HeaderMap) {
    headers.remove(ACCEPT_ENCODING);
}

/// Point `Host` at the backend authority.
pub fn set_host(headers: &mut HeaderMap, authority: &str) {
    if let Ok(value) = HeaderValue::from_str(authority) {
        headers.insert(HOST, value);
    }
}

/// Rewrite the URL-valued headers `names` with `rules`.
///
/// Each value is first offered to header-scoped rules, then the values of
/// `query_params` inside it are rewritten as URLs of their own.
pub fn rewrite_url_headers(
    headers: &mut HeaderMap,
    names: &[HeaderName],
    query_params: &[String],
    direction: Direction,
    rules: &RuleSet,
    ctx: &RewriteContext,
) -> Result<(), RewriteError> {
    for name in names {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        if values.is_empty() {
            continue;
        }

        let mut rewritten = Vec::with_capacity(values.len());
        for value in &values {
            let new = rules
                .apply(direction, Scope::Header, value, ctx)?
                .unwrap_or_else(|| value.clone());
            rewritten.push(rewrite_query_values(direction, rules, query_params, &new, ctx)?);
        }
        if rewritten == values {
            continue;
        }

        headers.remove(name);
        for value in rewritten {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => {
                    tracing::warn!(
                        header = %name,
                        value = %value,
                        "Rewritten header value is not valid; dropped"
                    );
                }
            }
        }
    }
    Ok(())
}
