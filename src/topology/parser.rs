//! Topology Loader/Parser.
//!
//! Pure: bytes in, `TopologyDescriptor` or `ParseError` out.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::services::{ServiceRegistry, ServiceVersion};
use crate::topology::descriptor::{
    is_valid_name, DescriptorFormat, ProviderConfig, ServiceBinding, TopologyDescriptor,
};

/// A descriptor that cannot become a `TopologyDescriptor`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed {format} descriptor: {reason}")]
    Malformed {
        format: DescriptorFormat,
        reason: String,
    },

    #[error("'{0}' is not a valid topology name")]
    InvalidName(String),

    #[error("descriptor declares name '{found}' but is stored as '{expected}'")]
    NameMismatch { expected: String, found: String },

    #[error("unknown service role '{0}'")]
    UnknownRole(String),

    #[error("service role '{0}' is bound more than once")]
    DuplicateBinding(String),

    #[error("service '{role}' has no backend URL")]
    MissingUrl { role: String },

    #[error("service '{role}' has invalid URL '{url}': {reason}")]
    InvalidUrl {
        role: String,
        url: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "provider", alias = "providers")]
    providers: Vec<ProviderDef>,
    #[serde(default, rename = "service", alias = "services")]
    services: Vec<BindingDef>,
}

#[derive(Debug, Deserialize)]
struct ProviderDef {
    role: String,
    name: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BindingDef {
    role: String,
    #[serde(default)]
    version: Option<ServiceVersion>,
    #[serde(default, alias = "url")]
    urls: Vec<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

/// Parse one descriptor stored under `name`.
///
/// `registry` is consulted only for the set of known roles.
pub fn parse_descriptor(
    name: &str,
    source: &[u8],
    format: DescriptorFormat,
    registry: &ServiceRegistry,
) -> Result<TopologyDescriptor, ParseError> {
    if !is_valid_name(name) {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    let malformed = |reason: String| ParseError::Malformed { format, reason };

    let file: DescriptorFile = match format {
        DescriptorFormat::Toml => {
            let text = std::str::from_utf8(source).map_err(|e| malformed(e.to_string()))?;
            toml::from_str(text).map_err(|e| malformed(e.to_string()))?
        }
        DescriptorFormat::Json => {
            serde_json::from_slice(source).map_err(|e| malformed(e.to_string()))?
        }
    };

    if let Some(declared) = &file.name {
        if declared != name {
            return Err(ParseError::NameMismatch {
                expected: name.to_string(),
                found: declared.clone(),
            });
        }
    }

    let providers = file
        .providers
        .into_iter()
        .map(|p| ProviderConfig {
            role: p.role,
            name: p.name,
            enabled: p.enabled,
            params: p.params,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut services = Vec::with_capacity(file.services.len());
    for def in file.services {
        let role = def.role.trim().to_ascii_uppercase();
        if !registry.has_role(&role) {
            return Err(ParseError::UnknownRole(role));
        }
        if !seen.insert(role.clone()) {
            return Err(ParseError::DuplicateBinding(role));
        }
        if def.urls.is_empty() {
            return Err(ParseError::MissingUrl { role });
        }
        let urls = def
            .urls
            .iter()
            .map(|raw| parse_backend_url(&role, raw))
            .collect::<Result<Vec<_>, _>>()?;

        services.push(ServiceBinding {
            role,
            version: def.version,
            urls,
            path: def.path,
            params: def.params,
        });
    }

    Ok(TopologyDescriptor {
        name: name.to_string(),
        providers,
        services,
    })
}

fn parse_backend_url(role: &str, raw: &str) -> Result<Url, ParseError> {
    let invalid = |reason: String| ParseError::InvalidUrl {
        role: role.to_string(),
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("URL has no host".into()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base URLs cannot carry a query or fragment".into()));
    }
    Ok(url)
}
