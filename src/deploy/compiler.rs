//! Deployment Engine: TopologyDescriptor + ServiceRegistry → RoutingContext.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::deploy::context::{BoundTarget, DispatchDescriptor, RoutingContext};
use crate::deploy::DeployError;
use crate::services::{path_segments, ServiceRegistry};
use crate::topology::TopologyDescriptor;

/// Compile a whole topology or fail without side effects.
pub fn compile(
    descriptor: &TopologyDescriptor,
    registry: &ServiceRegistry,
    generation: u64,
) -> Result<RoutingContext, DeployError> {
    // First URL of every role, for {$serviceUrl[ROLE]} references.
    let primary: HashMap<&str, &Url> = descriptor
        .services
        .iter()
        .filter_map(|b| b.urls.first().map(|u| (b.role.as_str(), u)))
        .collect();

    let mut prefixes: HashMap<Vec<String>, String> = HashMap::new();
    let mut services = Vec::with_capacity(descriptor.services.len());

    for binding in &descriptor.services {
        let definition = registry
            .resolve(&binding.role, binding.version.as_ref())
            .map_err(|source| DeployError::Lookup {
                role: binding.role.clone(),
                source,
            })?;

        let prefix = match &binding.path {
            Some(path) => path_segments(path),
            None => definition.path.clone(),
        };
        if prefix.is_empty() {
            return Err(DeployError::EmptyPrefix {
                role: binding.role.clone(),
            });
        }
        if let Some(other) = prefixes.insert(prefix.clone(), binding.role.clone()) {
            return Err(DeployError::AmbiguousPrefix {
                prefix: format!("/{}", prefix.join("/")),
                first: other,
                second: binding.role.clone(),
            });
        }

        let mut targets = Vec::with_capacity(binding.urls.len());
        for url in &binding.urls {
            let resolve = |role: Option<&str>| -> Option<Url> {
                match role {
                    None => Some(url.clone()),
                    Some(r) if r.eq_ignore_ascii_case(&binding.role) => Some(url.clone()),
                    Some(r) => primary.get(r.to_ascii_uppercase().as_str()).map(|u| (*u).clone()),
                }
            };
            let rules = definition
                .rules
                .bind(&resolve)
                .map_err(|source| DeployError::Rule {
                    role: binding.role.clone(),
                    source,
                })?;
            targets.push(BoundTarget {
                base_url: url.clone(),
                rules,
            });
        }

        tracing::debug!(
            topology = %descriptor.name,
            role = %binding.role,
            version = %definition.version,
            prefix = %format!("/{}", prefix.join("/")),
            targets = targets.len(),
            "Compiled service"
        );
        services.push(Arc::new(DispatchDescriptor::new(
            binding.role.clone(),
            prefix,
            definition,
            targets,
        )));
    }

    Ok(RoutingContext::new(descriptor.clone(), generation, services))
}
