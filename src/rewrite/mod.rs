//! Rewrite engine subsystem.
//!
//! # Data Flow
//! ```text
//! Service definition load (once):
//!     pattern / template strings
//!     → template.rs (parse URL-shaped templates)
//!     → rule.rs (placeholder balance check → RewriteRule)
//!
//! Deployment (per topology change):
//!     RewriteRule + backend base URL
//!     → rule.rs bind() ({$serviceUrl} resolved)
//!     → RuleSet (ordered, immutable)
//!
//! Per request:
//!     subject (URL / header value / JSON field)
//!     → matcher.rs (segment match with captures)
//!     → first matching rule renders its template
//!     → content.rs walks JSON bodies and feeds string fields through the same rules
//! ```
//!
//! # Design Decisions
//! - First match wins, in declaration order; rule order is meaningful
//! - Unmatched subjects pass through unchanged
//! - Every placeholder problem is caught when the rule is built, never per request
//! - Matching and rendering are pure; no locks, no shared mutable state

pub mod content;
pub mod matcher;
pub mod rule;
pub mod template;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use content::{ContentFilter, JsonPath};
pub use matcher::Subject;
pub use rule::{RewriteRule, RuleSet};
pub use template::Template;

/// Which way a rule rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client-facing → backend.
    Inbound,
    /// Backend → client-facing.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Where a rule may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Any,
    Url,
    Header,
    Body,
}

impl Scope {
    /// True when a rule with this scope may be used for `subject`.
    pub fn admits(self, subject: Scope) -> bool {
        self == Scope::Any || self == subject
    }
}

/// Errors in a rule definition, raised at load or deployment time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule '{rule}': malformed template '{template}': {reason}")]
    Malformed {
        rule: String,
        template: String,
        reason: String,
    },

    #[error("rule '{rule}': template references '{name}' which the pattern does not capture")]
    Uncaptured { rule: String, name: String },

    #[error("rule '{rule}': pattern captures '{name}' which the template never uses")]
    Unused { rule: String, name: String },

    #[error("rule '{rule}': {reason}")]
    Unsupported { rule: String, reason: String },

    #[error("rule '{rule}': no backend URL for role '{role}' in this topology")]
    UnboundService { rule: String, role: String },
}

/// Errors while rewriting a live request or response.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rule '{rule}' could not resolve placeholder '{name}'")]
    UnresolvedPlaceholder { rule: String, name: String },

    #[error("rule '{rule}' references a template function with no value in this request")]
    MissingContext { rule: String },

    #[error("content filter names unknown rule '{0}'")]
    UnknownRule(String),

    #[error("body rewrite failed: {0}")]
    Body(#[from] serde_json::Error),
}

/// Request-scoped values templates may refer to.
#[derive(Debug, Clone, Default)]
pub struct RewriteContext {
    /// Client-facing base of the topology, e.g. `https://gw:8443/gateway/sandbox`.
    pub frontend_url: Option<String>,
    /// Path part of `frontend_url`, e.g. `/gateway/sandbox`.
    pub frontend_path: Option<String>,
    /// Authenticated principal, if any.
    pub username: Option<String>,
}

impl RewriteContext {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        let frontend_url = frontend_url.into().trim_end_matches('/').to_string();
        let frontend_path = match url::Url::parse(&frontend_url) {
            Ok(url) => url.path().trim_end_matches('/').to_string(),
            Err(_) => frontend_url.clone(),
        };
        Self {
            frontend_url: Some(frontend_url),
            frontend_path: Some(frontend_path),
            username: None,
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

/// Rewrite one subject with the first matching rule of `rules`.
///
/// Subjects no rule matches come back unchanged.
pub fn rewrite(
    direction: Direction,
    rules: &RuleSet,
    scope: Scope,
    subject: &str,
    ctx: &RewriteContext,
) -> Result<String, RewriteError> {
    Ok(rules
        .apply(direction, scope, subject, ctx)?
        .unwrap_or_else(|| subject.to_string()))
}

/// Rewrite the values of the named query parameters of `url` as URLs.
///
/// Values are percent-decoded before matching and re-encoded afterwards;
/// other parameters are left byte-for-byte intact.
pub fn rewrite_query_values(
    direction: Direction,
    rules: &RuleSet,
    params: &[String],
    url: &str,
    ctx: &RewriteContext,
) -> Result<String, RewriteError> {
    if params.is_empty() {
        return Ok(url.to_string());
    }
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((before, frag)) => (before, Some(frag)),
        None => (url, None),
    };
    let Some((base, query)) = without_fragment.split_once('?') else {
        return Ok(url.to_string());
    };

    let mut pairs = Vec::new();
    for pair in query.split('&') {
        let rewritten = match pair.split_once('=') {
            Some((key, value)) if params.iter().any(|p| p == key) => {
                let decoded: String = url::form_urlencoded::parse(format!("v={}", value).as_bytes())
                    .next()
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                match rules.apply(direction, Scope::Url, &decoded, ctx)? {
                    Some(new) => format!(
                        "{}={}",
                        key,
                        url::form_urlencoded::byte_serialize(new.as_bytes()).collect::<String>()
                    ),
                    None => pair.to_string(),
                }
            }
            _ => pair.to_string(),
        };
        pairs.push(rewritten);
    }

    let mut out = format!("{}?{}", base, pairs.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_rewritten_in_place() {
        let rules = RuleSet::new(vec![RewriteRule::new(
            "back",
            Direction::Outbound,
            Scope::Any,
            "*://*:*/api/{**}",
            "{$frontend[url]}/svc/api/{**}",
        )
        .unwrap()]);
        let ctx = RewriteContext::new("https://gw/gateway/t");
        let out = rewrite_query_values(
            Direction::Outbound,
            &rules,
            &["origin".to_string()],
            "https://login/form?origin=http%3A%2F%2Fbackend%3A8080%2Fapi%2Fx&keep=http%3A%2F%2Fbackend%2Fapi#top",
            &ctx,
        )
        .unwrap();
        assert_eq!(
            out,
            "https://login/form?origin=https%3A%2F%2Fgw%2Fgateway%2Ft%2Fsvc%2Fapi%2Fx&keep=http%3A%2F%2Fbackend%2Fapi#top"
        );
    }

    #[test]
    fn frontend_context_splits_path() {
        let ctx = RewriteContext::new("http://gw:8443/gateway/sandbox/");
        assert_eq!(ctx.frontend_url.as_deref(), Some("http://gw:8443/gateway/sandbox"));
        assert_eq!(ctx.frontend_path.as_deref(), Some("/gateway/sandbox"));
    }

    #[test]
    fn scope_admission() {
        assert!(Scope::Any.admits(Scope::Body));
        assert!(Scope::Header.admits(Scope::Header));
        assert!(!Scope::Url.admits(Scope::Body));
    }
}
