//! Routing Context and Dispatch Descriptor.
//!
//! # Design Decisions
//! - A context is never mutated after publication; redeploys build a new one
//! - Requests hold an `Arc<RoutingContext>` for their whole lifetime, so an
//!   old context is dropped only after the last in-flight request finishes
//! - Service prefixes are sorted longest first so resolution is a linear
//!   scan that stops at the first hit

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use url::Url;

use crate::rewrite::RuleSet;
use crate::services::{DispatchContract, ServiceDefinition};
use crate::topology::TopologyDescriptor;

/// The compiled, serving-ready form of one topology.
#[derive(Debug)]
pub struct RoutingContext {
    pub topology: String,
    /// Monotonic per-process deployment counter.
    pub generation: u64,
    pub descriptor: TopologyDescriptor,
    pub deployed_at: SystemTime,
    services: Vec<Arc<DispatchDescriptor>>,
}

impl RoutingContext {
    pub(crate) fn new(
        descriptor: TopologyDescriptor,
        generation: u64,
        mut services: Vec<Arc<DispatchDescriptor>>,
    ) -> Self {
        services.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        Self {
            topology: descriptor.name.clone(),
            generation,
            descriptor,
            deployed_at: SystemTime::now(),
            services,
        }
    }

    /// Services ordered longest prefix first.
    pub fn services(&self) -> &[Arc<DispatchDescriptor>] {
        &self.services
    }

    /// Longest-prefix match of a service-relative path.
    ///
    /// Returns the descriptor and the path segments left after its prefix.
    pub fn resolve<'a>(
        &self,
        segments: &'a [&'a str],
    ) -> Option<(Arc<DispatchDescriptor>, &'a [&'a str])> {
        self.services.iter().find_map(|svc| {
            let matches = svc.prefix.len() <= segments.len()
                && svc.prefix.iter().zip(segments).all(|(p, s)| p == s);
            matches.then(|| (Arc::clone(svc), &segments[svc.prefix.len()..]))
        })
    }
}

impl Drop for RoutingContext {
    fn drop(&mut self) {
        tracing::debug!(
            topology = %self.topology,
            generation = self.generation,
            "Routing context retired"
        );
    }
}

/// One backend URL with the rule set bound against it.
#[derive(Debug)]
pub struct BoundTarget {
    pub base_url: Url,
    pub rules: RuleSet,
}

/// Everything needed to serve one service of one topology.
#[derive(Debug)]
pub struct DispatchDescriptor {
    pub role: String,
    /// Gateway path prefix segments within the topology.
    pub prefix: Vec<String>,
    pub definition: Arc<ServiceDefinition>,
    /// One entry per backend URL, in failover order.
    pub targets: Vec<BoundTarget>,
    next: AtomicUsize,
}

impl DispatchDescriptor {
    pub(crate) fn new(
        role: String,
        prefix: Vec<String>,
        definition: Arc<ServiceDefinition>,
        targets: Vec<BoundTarget>,
    ) -> Self {
        Self {
            role,
            prefix,
            definition,
            targets,
            next: AtomicUsize::new(0),
        }
    }

    pub fn contract(&self) -> &DispatchContract {
        &self.definition.contract
    }

    /// `/`-joined prefix, e.g. `/ambari`.
    pub fn prefix_path(&self) -> String {
        format!("/{}", self.prefix.join("/"))
    }

    /// Targets in the order one request should try them.
    ///
    /// The starting point rotates round-robin across calls.
    pub fn failover_order(&self) -> Vec<&BoundTarget> {
        let len = self.targets.len();
        if len == 0 {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(|i| &self.targets[(start + i) % len]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceDefinitionFile;

    fn definition(path: &str) -> Arc<ServiceDefinition> {
        let source = format!("role = \"X\"\nversion = \"1\"\npath = \"{}\"\n", path);
        let file: ServiceDefinitionFile = toml::from_str(&source).unwrap();
        Arc::new(ServiceDefinition::compile(file).unwrap())
    }

    fn descriptor(prefix: &[&str], urls: &[&str]) -> Arc<DispatchDescriptor> {
        Arc::new(DispatchDescriptor::new(
            "X".into(),
            prefix.iter().map(|s| s.to_string()).collect(),
            definition("/x"),
            urls.iter()
                .map(|u| BoundTarget {
                    base_url: Url::parse(u).unwrap(),
                    rules: RuleSet::default(),
                })
                .collect(),
        ))
    }

    fn context(services: Vec<Arc<DispatchDescriptor>>) -> RoutingContext {
        RoutingContext::new(
            TopologyDescriptor {
                name: "t".into(),
                providers: vec![],
                services: vec![],
            },
            1,
            services,
        )
    }

    #[test]
    fn longest_prefix_wins() {
        let ctx = context(vec![
            descriptor(&["a"], &["http://a"]),
            descriptor(&["a", "b"], &["http://ab"]),
        ]);
        let path = ["a", "b", "c"];
        let (svc, rest) = ctx.resolve(&path).unwrap();
        assert_eq!(svc.prefix_path(), "/a/b");
        assert_eq!(rest, &["c"]);

        let path = ["a", "x"];
        let (svc, rest) = ctx.resolve(&path).unwrap();
        assert_eq!(svc.prefix_path(), "/a");
        assert_eq!(rest, &["x"]);

        let path = ["ab"];
        assert!(ctx.resolve(&path).is_none());
    }

    #[test]
    fn failover_order_rotates() {
        let svc = descriptor(&["a"], &["http://one", "http://two"]);
        let hosts = |order: Vec<&BoundTarget>| -> Vec<String> {
            order
                .iter()
                .map(|t| t.base_url.host_str().unwrap().to_string())
                .collect()
        };
        let first = hosts(svc.failover_order());
        let second = hosts(svc.failover_order());
        assert_eq!(first, vec!["one", "two"]);
        assert_eq!(second, vec!["two", "one"]);
    }
}
