//! Service definition records.
//!
//! # Responsibilities
//! - Deserialize `service.toml` into raw serde structs
//! - Compile raw rules into validated `RewriteRule`s
//! - Compile the dispatch contract (methods, headers, content filters)
//!
//! # Design Decisions
//! - Everything that can be checked without a topology is checked here
//! - Compiled definitions are immutable and shared via `Arc`

use std::collections::BTreeSet;

use axum::http::{HeaderName, Method};
use serde::{Deserialize, Serialize};

use crate::rewrite::{ContentFilter, Direction, JsonPath, RewriteRule, RuleError, RuleSet, Scope};
use crate::services::version::ServiceVersion;

/// On-disk shape of a service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceDefinitionFile {
    /// Service role, e.g. `AMBARI`.
    pub role: String,

    /// Dialect version, e.g. `2.2.0`.
    pub version: ServiceVersion,

    /// Short lowercase name used in logs and metrics.
    #[serde(default)]
    pub name: Option<String>,

    /// Gateway path prefix the service is mounted at, e.g. `/ambari`.
    pub path: String,

    /// Ordered rewrite rules; order is significant.
    #[serde(default)]
    pub rules: Vec<RuleDef>,

    /// Forwarding contract.
    #[serde(default)]
    pub dispatch: DispatchContractDef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleDef {
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub scope: Scope,
    pub pattern: String,
    pub template: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchContractDef {
    /// Allowed verbs; anything else is answered with 405.
    pub methods: Vec<String>,

    /// What happens to client credentials on the way to the backend.
    pub identity: IdentityPolicy,

    /// Request headers whose values are rewritten as URLs.
    pub inbound_headers: Vec<String>,

    /// Response headers whose values are rewritten as URLs.
    pub outbound_headers: Vec<String>,

    /// Query parameters whose values are rewritten as URLs.
    pub query_params: Vec<String>,

    /// Body filters.
    pub content: Vec<ContentDef>,
}

impl Default for DispatchContractDef {
    fn default() -> Self {
        Self {
            methods: ["GET", "HEAD", "POST", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            identity: IdentityPolicy::default(),
            inbound_headers: Vec::new(),
            outbound_headers: vec!["Location".to_string(), "Content-Location".to_string()],
            query_params: Vec::new(),
            content: Vec::new(),
        }
    }
}

/// Credential forwarding policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Forward `Authorization` and cookies untouched.
    #[default]
    PassThrough,
    /// Remove client credentials.
    Strip,
    /// Remove client credentials and name the principal in `header`.
    Substitute { header: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentDef {
    pub direction: Direction,
    pub types: Vec<String>,
    pub paths: Vec<String>,
    #[serde(default)]
    pub rule: Option<String>,
}

/// A compiled service dialect.
#[derive(Debug)]
pub struct ServiceDefinition {
    pub role: String,
    pub version: ServiceVersion,
    pub name: String,
    /// Normalised prefix segments, e.g. `["ambari"]`.
    pub path: Vec<String>,
    pub rules: RuleSet,
    pub contract: DispatchContract,
}

/// The compiled forwarding policy of a service.
#[derive(Debug, Clone)]
pub struct DispatchContract {
    pub methods: Vec<Method>,
    pub identity: IdentityPolicy,
    pub inbound_headers: Vec<HeaderName>,
    pub outbound_headers: Vec<HeaderName>,
    pub query_params: Vec<String>,
    pub content: Vec<ContentFilter>,
}

impl DispatchContract {
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// The first content filter for `direction` that accepts `content_type`.
    pub fn content_filter(
        &self,
        direction: Direction,
        content_type: Option<&str>,
    ) -> Option<&ContentFilter> {
        self.content
            .iter()
            .find(|f| f.accepts(direction, content_type))
    }
}

/// Why a definition file could not be compiled.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> DefinitionError {
    DefinitionError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Split a gateway path into non-empty segments.
pub fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ServiceDefinition {
    /// Compile a parsed definition file.
    pub fn compile(file: ServiceDefinitionFile) -> Result<Self, DefinitionError> {
        let role = file.role.trim().to_ascii_uppercase();
        if role.is_empty() {
            return Err(invalid("role", "must not be empty"));
        }
        if file.version.as_str().is_empty() {
            return Err(invalid("version", "must not be empty"));
        }
        let path = path_segments(&file.path);
        if path.is_empty() {
            return Err(invalid("path", "must name at least one segment"));
        }

        let mut names = BTreeSet::new();
        let mut rules = Vec::with_capacity(file.rules.len());
        for def in file.rules {
            if !names.insert(def.name.clone()) {
                return Err(DefinitionError::DuplicateRule(def.name));
            }
            rules.push(RewriteRule::new(
                def.name,
                def.direction,
                def.scope,
                &def.pattern,
                &def.template,
            )?);
        }
        let rules = RuleSet::new(rules);
        let contract = compile_contract(file.dispatch, &rules)?;

        Ok(Self {
            name: file.name.unwrap_or_else(|| role.to_ascii_lowercase()),
            role,
            version: file.version,
            path,
            rules,
            contract,
        })
    }

    /// `/`-joined prefix, e.g. `/ambari`.
    pub fn prefix(&self) -> String {
        format!("/{}", self.path.join("/"))
    }
}

fn compile_contract(
    def: DispatchContractDef,
    rules: &RuleSet,
) -> Result<DispatchContract, DefinitionError> {
    let methods = def
        .methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid("dispatch.methods", format!("'{}' is not an HTTP method", m)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if methods.is_empty() {
        return Err(invalid("dispatch.methods", "must allow at least one method"));
    }

    if let IdentityPolicy::Substitute { header } = &def.identity {
        HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            invalid(
                "dispatch.identity.header",
                format!("'{}' is not a header name", header),
            )
        })?;
    }

    let headers = |field: &'static str, list: &[String]| {
        list.iter()
            .map(|h| {
                HeaderName::from_bytes(h.trim().as_bytes())
                    .map_err(|_| invalid(field, format!("'{}' is not a header name", h)))
            })
            .collect::<Result<Vec<_>, _>>()
    };
    let inbound_headers = headers("dispatch.inbound_headers", &def.inbound_headers)?;
    let outbound_headers = headers("dispatch.outbound_headers", &def.outbound_headers)?;

    let mut content = Vec::with_capacity(def.content.len());
    for filter in def.content {
        if filter.types.is_empty() || filter.paths.is_empty() {
            return Err(invalid("dispatch.content", "filters need at least one type and one path"));
        }
        if let Some(name) = &filter.rule {
            match rules.find(name) {
                Some(rule) if rule.direction == filter.direction => {}
                Some(_) => {
                    return Err(invalid(
                        "dispatch.content.rule",
                        format!("rule '{}' is not a {} rule", name, filter.direction),
                    ))
                }
                None => {
                    return Err(invalid(
                        "dispatch.content.rule",
                        format!("unknown rule '{}'", name),
                    ))
                }
            }
        }
        let paths = filter
            .paths
            .iter()
            .map(|p| JsonPath::parse(p).map_err(|e| invalid("dispatch.content.paths", e)))
            .collect::<Result<Vec<_>, _>>()?;
        content.push(ContentFilter {
            direction: filter.direction,
            types: filter.types,
            paths,
            rule: filter.rule,
        });
    }

    Ok(DispatchContract {
        methods,
        identity: def.identity,
        inbound_headers,
        outbound_headers,
        query_params: def.query_params,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMBARI: &str = r#"
role = "ambari"
version = "2.2.0"
path = "/ambari/"

[[rules]]
name = "AMBARI/ambari/inbound/api"
direction = "inbound"
pattern = "*://*:*/**/ambari/api/{path=**}?{**}"
template = "{$serviceUrl}/api/{path=**}?{**}"

[[rules]]
name = "AMBARI/ambari/outbound/links"
direction = "outbound"
scope = "body"
pattern = "*://*:*/api/{path=**}?{**}"
template = "{$frontend[url]}/ambari/api/{path=**}?{**}"

[dispatch]
methods = ["get", "POST"]
identity = { policy = "substitute", header = "X-Remote-User" }

[[dispatch.content]]
direction = "outbound"
types = ["*/json"]
paths = ["$..href"]
rule = "AMBARI/ambari/outbound/links"
"#;

    fn parse(src: &str) -> ServiceDefinitionFile {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn compiles_full_definition() {
        let def = ServiceDefinition::compile(parse(AMBARI)).unwrap();
        assert_eq!(def.role, "AMBARI");
        assert_eq!(def.name, "ambari");
        assert_eq!(def.prefix(), "/ambari");
        assert_eq!(def.rules.rules().len(), 2);
        assert!(def.contract.allows(&Method::GET));
        assert!(!def.contract.allows(&Method::DELETE));
        assert_eq!(
            def.contract.identity,
            IdentityPolicy::Substitute { header: "X-Remote-User".into() }
        );
        assert!(def
            .contract
            .content_filter(Direction::Outbound, Some("application/json"))
            .is_some());
        assert!(def
            .contract
            .content_filter(Direction::Inbound, Some("application/json"))
            .is_none());
    }

    #[test]
    fn contract_defaults_apply() {
        let file = parse("role = \"X\"\nversion = \"1\"\npath = \"/x\"\n");
        let def = ServiceDefinition::compile(file).unwrap();
        assert!(def.contract.allows(&Method::PUT));
        assert_eq!(def.contract.identity, IdentityPolicy::PassThrough);
        assert_eq!(def.contract.outbound_headers.len(), 2);
    }

    #[test]
    fn content_filter_must_name_a_rule_of_its_direction() {
        let src = AMBARI.replace(
            "rule = \"AMBARI/ambari/outbound/links\"",
            "rule = \"AMBARI/ambari/inbound/api\"",
        );
        let err = ServiceDefinition::compile(parse(&src)).unwrap_err();
        assert!(matches!(err, DefinitionError::Invalid { field: "dispatch.content.rule", .. }));
    }

    #[test]
    fn broken_rule_is_reported() {
        let src = AMBARI.replace(
            "{$serviceUrl}/api/{path=**}?{**}",
            "{$serviceUrl}/api/{other}?{**}",
        );
        let err = ServiceDefinition::compile(parse(&src)).unwrap_err();
        assert!(matches!(err, DefinitionError::Rule(RuleError::Uncaptured { .. })));
    }

    #[test]
    fn duplicate_rule_names_rejected() {
        let src = AMBARI.replace(
            "AMBARI/ambari/outbound/links\"\ndirection",
            "AMBARI/ambari/inbound/api\"\ndirection",
        );
        let err = ServiceDefinition::compile(parse(&src)).unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateRule("AMBARI/ambari/inbound/api".into()));
    }

    #[test]
    fn empty_path_rejected() {
        let file = parse("role = \"X\"\nversion = \"1\"\npath = \"/\"\n");
        assert!(ServiceDefinition::compile(file).is_err());
    }
}
