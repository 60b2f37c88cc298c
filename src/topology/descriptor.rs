//! In-memory topology model.

use std::collections::BTreeMap;
use std::path::Path;

use url::Url;

use crate::services::ServiceVersion;

/// One parsed topology: named service bindings plus provider references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    /// Cluster identifier; unique within the gateway.
    pub name: String,
    pub providers: Vec<ProviderConfig>,
    pub services: Vec<ServiceBinding>,
}

impl TopologyDescriptor {
    pub fn binding(&self, role: &str) -> Option<&ServiceBinding> {
        self.services.iter().find(|b| b.role.eq_ignore_ascii_case(role))
    }

    /// The enabled provider for `role`, e.g. `authentication`.
    pub fn provider(&self, role: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.enabled && p.role.eq_ignore_ascii_case(role))
    }
}

/// A reference to an external provider (authentication, identity assertion...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub role: String,
    pub name: String,
    pub enabled: bool,
    pub params: BTreeMap<String, String>,
}

/// A service role bound to one or more backend base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    /// Upper-case role, e.g. `AMBARI`.
    pub role: String,
    /// Pinned dialect version; `None` binds the newest registered one.
    pub version: Option<ServiceVersion>,
    /// Backend base URLs, in failover order.
    pub urls: Vec<Url>,
    /// Overrides the service definition's gateway path prefix.
    pub path: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// Source formats a descriptor may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Toml,
    Json,
}

impl DescriptorFormat {
    /// Format implied by a file extension; `None` for files that are not descriptors.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for DescriptorFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Toml => f.write_str("toml"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Topology name for a descriptor path, if the path is a descriptor.
pub fn topology_name(path: &Path) -> Option<String> {
    DescriptorFormat::from_path(path)?;
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') || !is_valid_name(stem) {
        return None;
    }
    Some(stem.to_string())
}

/// Names appear as a single URL path segment.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
