//! Topology Service: the single writer of the Active Routing Table.
//!
//! # Responsibilities
//! - Turn descriptor changes into deployments (parse + compile off the request path)
//! - Publish compiled contexts with one atomic swap
//! - Keep the last good context serving when a redeploy fails
//! - Track per-topology state for operators
//!
//! # State machine (per topology)
//! ```text
//! ABSENT → DEPLOYING → ACTIVE
//! ACTIVE → DEPLOYING → ACTIVE            (redeploy, success or failure)
//! DEPLOYING → ABSENT                      (first deploy failed)
//! ACTIVE | DEPLOYING → REMOVED           (descriptor deleted)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::GatewaySettings;
use crate::deploy::{compile, RoutingContext};
use crate::observability::metrics;
use crate::services::ServiceRegistry;
use crate::topology::descriptor::{topology_name, DescriptorFormat};
use crate::topology::parser::parse_descriptor;
use crate::topology::watcher::TopologyEvent;
use crate::topology::TopologyError;

/// Topology name → published context.
pub type RoutingTable = HashMap<String, Arc<RoutingContext>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopologyState {
    Absent,
    Deploying,
    Active,
    Removed,
}

/// Operator-facing view of one topology.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyStatus {
    pub name: String,
    pub state: TopologyState,
    /// Generation of the context currently serving, if any.
    pub generation: Option<u64>,
    /// Error of the most recent failed deployment; cleared on success.
    pub last_error: Option<String>,
    #[serde(skip)]
    fingerprint: Option<Fingerprint>,
}

impl TopologyStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: TopologyState::Absent,
            generation: None,
            last_error: None,
            fingerprint: None,
        }
    }
}

/// Cheap change detection for descriptor files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Outcome of a directory rescan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadSummary {
    pub deployed: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

/// Owner of the Active Routing Table.
pub struct TopologyService {
    topology_dir: PathBuf,
    services_dir: PathBuf,
    table: ArcSwap<RoutingTable>,
    registry: ArcSwap<ServiceRegistry>,
    status: DashMap<String, TopologyStatus>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    generation: AtomicU64,
    rescan: Mutex<()>,
}

impl TopologyService {
    pub fn new(
        topology_dir: impl Into<PathBuf>,
        services_dir: impl Into<PathBuf>,
        registry: ServiceRegistry,
    ) -> Self {
        Self {
            topology_dir: topology_dir.into(),
            services_dir: services_dir.into(),
            table: ArcSwap::from_pointee(HashMap::new()),
            registry: ArcSwap::from_pointee(registry),
            status: DashMap::new(),
            locks: DashMap::new(),
            generation: AtomicU64::new(0),
            rescan: Mutex::new(()),
        }
    }

    /// Load the service registry named by `settings` and build the service.
    pub fn open(settings: &GatewaySettings) -> Result<Self, TopologyError> {
        let registry = ServiceRegistry::load(Path::new(&settings.services_dir))?;
        Ok(Self::new(&settings.topology_dir, &settings.services_dir, registry))
    }

    pub fn topology_dir(&self) -> &Path {
        &self.topology_dir
    }

    /// The context serving `name`, if any. One atomic read.
    pub fn active(&self, name: &str) -> Option<Arc<RoutingContext>> {
        self.table.load().get(name).cloned()
    }

    /// The whole table as one consistent snapshot.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.load_full()
    }

    pub fn status(&self, name: &str) -> Option<TopologyStatus> {
        self.status.get(name).map(|s| s.clone())
    }

    /// Every topology ever seen, sorted by name.
    pub fn statuses(&self) -> Vec<TopologyStatus> {
        let mut all: Vec<TopologyStatus> =
            self.status.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock of `name` unless another task still holds a handle to it.
    fn release_lock(&self, name: &str) {
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn update_status(&self, name: &str, f: impl FnOnce(&mut TopologyStatus)) {
        let mut entry = self
            .status
            .entry(name.to_string())
            .or_insert_with(|| TopologyStatus::new(name));
        f(entry.value_mut());
    }

    /// Parse, compile and publish one descriptor file.
    ///
    /// On failure the previously active context, if any, keeps serving.
    pub async fn deploy_file(&self, path: &Path) -> Result<Arc<RoutingContext>, TopologyError> {
        let name = topology_name(path)
            .ok_or_else(|| TopologyError::NotADescriptor(path.to_path_buf()))?;
        let format = DescriptorFormat::from_path(path)
            .ok_or_else(|| TopologyError::NotADescriptor(path.to_path_buf()))?;

        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;
        self.deploy_locked(&name, path, format).await
    }

    async fn deploy_locked(
        &self,
        name: &str,
        path: &Path,
        format: DescriptorFormat,
    ) -> Result<Arc<RoutingContext>, TopologyError> {
        self.update_status(name, |s| s.state = TopologyState::Deploying);
        tracing::info!(topology = %name, path = %path.display(), "Deploying topology");

        let registry = self.registry.load_full();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let owned_name = name.to_string();
        let owned_path = path.to_path_buf();

        let compiled = tokio::task::spawn_blocking(move || -> Result<_, TopologyError> {
            let fingerprint = Fingerprint::of(&owned_path).map_err(|source| TopologyError::Io {
                path: owned_path.clone(),
                source,
            })?;
            let bytes = std::fs::read(&owned_path).map_err(|source| TopologyError::Io {
                path: owned_path.clone(),
                source,
            })?;
            let result = parse_descriptor(&owned_name, &bytes, format, &registry)
                .map_err(TopologyError::from)
                .and_then(|descriptor| {
                    compile(&descriptor, &registry, generation).map_err(TopologyError::from)
                });
            Ok((fingerprint, result))
        })
        .await
        .map_err(|e| TopologyError::Join(e.to_string()));

        let (fingerprint, result) = match compiled {
            Ok(Ok(pair)) => (Some(pair.0), pair.1),
            Ok(Err(e)) | Err(e) => (None, Err(e)),
        };

        match result {
            Ok(context) => {
                let context = Arc::new(context);
                self.publish(name, Arc::clone(&context));
                self.update_status(name, |s| {
                    s.state = TopologyState::Active;
                    s.generation = Some(generation);
                    s.last_error = None;
                    s.fingerprint = fingerprint;
                });
                metrics::record_deployment(name, "success");
                tracing::info!(
                    topology = %name,
                    generation,
                    services = context.services().len(),
                    "Topology deployed"
                );
                Ok(context)
            }
            Err(e) => {
                let serving = self.active(name).is_some();
                self.update_status(name, |s| {
                    s.state = if serving {
                        TopologyState::Active
                    } else {
                        TopologyState::Absent
                    };
                    s.last_error = Some(e.to_string());
                    s.fingerprint = fingerprint;
                });
                metrics::record_deployment(name, "failure");
                tracing::error!(
                    topology = %name,
                    error = %e,
                    still_serving = serving,
                    "Topology deployment failed"
                );
                Err(e)
            }
        }
    }

    fn publish(&self, name: &str, context: Arc<RoutingContext>) {
        let previous = self.table.rcu(|table| {
            let mut next = RoutingTable::clone(table);
            next.insert(name.to_string(), Arc::clone(&context));
            next
        });
        metrics::set_active_topologies(self.table.load().len());
        if let Some(old) = previous.get(name) {
            tracing::debug!(
                topology = %name,
                generation = old.generation,
                in_flight = Arc::strong_count(old).saturating_sub(1),
                "Retiring routing context"
            );
        }
    }

    /// Stop serving `name`. Returns whether a context was active.
    pub async fn remove(&self, name: &str) -> bool {
        let lock = self.lock_for(name);
        let was_active = {
            let _guard = lock.lock().await;
            self.remove_locked(name)
        };
        drop(lock);
        self.release_lock(name);
        was_active
    }

    fn remove_locked(&self, name: &str) -> bool {
        let previous = self.table.rcu(|table| {
            let mut next = RoutingTable::clone(table);
            next.remove(name);
            next
        });
        let was_active = previous.contains_key(name);
        metrics::set_active_topologies(self.table.load().len());

        if self.status.contains_key(name) {
            self.update_status(name, |s| {
                s.state = TopologyState::Removed;
                s.generation = None;
                s.fingerprint = None;
            });
        }
        if was_active {
            metrics::record_deployment(name, "removed");
            tracing::info!(topology = %name, "Topology removed");
        }
        was_active
    }

    /// React to one change notification.
    pub async fn handle_event(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::Changed(path) => {
                let Some(name) = topology_name(&path) else {
                    return;
                };
                let lock = self.lock_for(&name);
                let removed = {
                    let _guard = lock.lock().await;
                    // The event path may be a shadowed duplicate; deploy whichever
                    // file currently owns the name.
                    let owner = match self.owner_of(&name).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            tracing::error!(
                                topology = %name,
                                error = %e,
                                "Cannot scan topology directory"
                            );
                            return;
                        }
                    };
                    match owner.and_then(|p| DescriptorFormat::from_path(&p).map(|f| (p, f))) {
                        Some((owner, format)) => {
                            let _ = self.deploy_locked(&name, &owner, format).await;
                            false
                        }
                        None => {
                            self.remove_locked(&name);
                            true
                        }
                    }
                };
                if removed {
                    drop(lock);
                    self.release_lock(&name);
                }
            }
            TopologyEvent::Rescan => {
                if let Err(e) = self.reload_topologies().await {
                    tracing::error!(error = %e, "Topology rescan failed");
                }
            }
        }
    }

    /// Rescan the descriptor directory: deploy new and changed descriptors,
    /// remove vanished ones.
    pub async fn reload_topologies(&self) -> Result<ReloadSummary, TopologyError> {
        self.rescan(false).await
    }

    /// Reload the service registry wholesale and redeploy every descriptor.
    pub async fn reload_services(&self) -> Result<ReloadSummary, TopologyError> {
        let dir = self.services_dir.clone();
        let registry = tokio::task::spawn_blocking(move || ServiceRegistry::load(&dir))
            .await
            .map_err(|e| TopologyError::Join(e.to_string()))??;
        self.registry.store(Arc::new(registry));
        self.rescan(true).await
    }

    async fn rescan(&self, force: bool) -> Result<ReloadSummary, TopologyError> {
        let _guard = self.rescan.lock().await;
        // Tombstones of topologies removed by an earlier pass.
        self.status.retain(|_, s| s.state != TopologyState::Removed);
        let found = self.scan().await?;
        let mut summary = ReloadSummary::default();

        for (name, path) in &found {
            let lock = self.lock_for(name);
            let _topology = lock.lock().await;

            let current = Fingerprint::of(path).ok();
            let known = self.status.get(name).and_then(|s| s.fingerprint);
            if !force && current.is_some() && current == known {
                summary.unchanged += 1;
                continue;
            }
            let Some(format) = DescriptorFormat::from_path(path) else {
                continue;
            };
            match self.deploy_locked(name, path, format).await {
                Ok(_) => summary.deployed.push(name.clone()),
                Err(e) => {
                    summary.failed.insert(name.clone(), e.to_string());
                }
            }
        }

        let vanished: Vec<String> = self
            .status
            .iter()
            .filter(|s| s.state != TopologyState::Removed && !found.contains_key(s.key()))
            .map(|s| s.key().clone())
            .collect();
        for name in vanished {
            let lock = self.lock_for(&name);
            {
                let _topology = lock.lock().await;
                // A change event may have deployed a new descriptor since the scan.
                if self.owner_of(&name).await?.is_some() {
                    tracing::debug!(topology = %name, "Descriptor reappeared during rescan");
                    continue;
                }
                self.remove_locked(&name);
            }
            drop(lock);
            self.release_lock(&name);
            summary.removed.push(name);
        }

        let quiet = summary.deployed.is_empty()
            && summary.failed.is_empty()
            && summary.removed.is_empty();
        if quiet {
            tracing::debug!(unchanged = summary.unchanged, "Topology rescan found no changes");
        } else {
            tracing::info!(
                deployed = summary.deployed.len(),
                failed = summary.failed.len(),
                removed = summary.removed.len(),
                unchanged = summary.unchanged,
                "Topology rescan complete"
            );
        }
        Ok(summary)
    }

    /// Every descriptor in the topology directory, keyed by topology name.
    async fn scan(&self) -> Result<BTreeMap<String, PathBuf>, TopologyError> {
        let dir = self.topology_dir.clone();
        tokio::task::spawn_blocking(move || scan_descriptors(&dir))
            .await
            .map_err(|e| TopologyError::Join(e.to_string()))?
    }

    /// The file that currently provides `name`, if any.
    async fn owner_of(&self, name: &str) -> Result<Option<PathBuf>, TopologyError> {
        Ok(self.scan().await?.remove(name))
    }

    /// Drive the service from watcher events until shutdown.
    ///
    /// `rescan_every` adds a periodic rescan that catches changes the
    /// watcher missed.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TopologyEvent>,
        rescan_every: Option<Duration>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = rescan_every.map(|period| {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            let tick = async {
                match ticker.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        let service = Arc::clone(&self);
                        tokio::spawn(async move { service.handle_event(event).await });
                    }
                    None => {
                        tracing::debug!("Topology event stream closed");
                        break;
                    }
                },
                _ = tick => {
                    if let Err(e) = self.reload_topologies().await {
                        tracing::error!(error = %e, "Periodic topology rescan failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Topology service stopping");
                    break;
                }
            }
        }
    }
}

fn scan_descriptors(dir: &Path) -> Result<BTreeMap<String, PathBuf>, TopologyError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TopologyError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        let Some(name) = topology_name(&path) else {
            continue;
        };
        if let Some(kept) = found.get(&name) {
            tracing::warn!(
                topology = %name,
                kept = %kept.display(),
                ignored = %path.display(),
                "Two descriptors share a topology name"
            );
            continue;
        }
        found.insert(name, path);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ServiceDefinition, ServiceDefinitionFile};

    fn registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        let file: ServiceDefinitionFile =
            toml::from_str("role = \"AMBARI\"\nversion = \"1\"\npath = \"/ambari\"\n").unwrap();
        registry.register(ServiceDefinition::compile(file).unwrap());
        registry
    }

    fn service(dir: &Path) -> TopologyService {
        TopologyService::new(dir, dir.join("services"), registry())
    }

    const GOOD: &str = "[[service]]\nrole = \"AMBARI\"\nurls = [\"http://localhost:8080\"]\n";
    const BAD: &str = "[[service]]\nrole = \"NOPE\"\nurls = [\"http://localhost:8080\"]\n";

    #[tokio::test]
    async fn failed_redeploy_keeps_previous_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        std::fs::write(&path, GOOD).unwrap();
        let svc = service(dir.path());

        let first = svc.deploy_file(&path).await.unwrap();
        std::fs::write(&path, BAD).unwrap();
        assert!(svc.deploy_file(&path).await.is_err());

        let serving = svc.active("sandbox").unwrap();
        assert!(Arc::ptr_eq(&first, &serving));
        let status = svc.status("sandbox").unwrap();
        assert_eq!(status.state, TopologyState::Active);
        assert!(status.last_error.unwrap().contains("NOPE"));
    }

    #[tokio::test]
    async fn first_deploy_failure_leaves_topology_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, BAD).unwrap();
        let svc = service(dir.path());

        assert!(svc.deploy_file(&path).await.is_err());
        assert!(svc.active("broken").is_none());
        assert_eq!(svc.status("broken").unwrap().state, TopologyState::Absent);
    }

    #[tokio::test]
    async fn rescan_deploys_skips_unchanged_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), GOOD).unwrap();
        std::fs::write(dir.path().join("b.toml"), GOOD).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let svc = service(dir.path());

        let summary = svc.reload_topologies().await.unwrap();
        assert_eq!(summary.deployed, vec!["a", "b"]);

        let summary = svc.reload_topologies().await.unwrap();
        assert!(summary.deployed.is_empty());
        assert_eq!(summary.unchanged, 2);

        std::fs::remove_file(dir.path().join("b.toml")).unwrap();
        let summary = svc.reload_topologies().await.unwrap();
        assert_eq!(summary.removed, vec!["b"]);
        assert!(svc.active("b").is_none());
        assert_eq!(svc.status("b").unwrap().state, TopologyState::Removed);
        assert!(svc.active("a").is_some());

        svc.reload_topologies().await.unwrap();
        assert!(svc.status("b").is_none());
        assert!(!svc.locks.contains_key("b"));
    }

    #[tokio::test]
    async fn rescan_keeps_a_topology_deployed_by_a_concurrent_event() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), GOOD).unwrap();
        let svc = Arc::new(service(dir.path()));

        // Park the rescan on topology "a" after it has listed the directory.
        let lock = svc.lock_for("a");
        let guard = lock.lock().await;
        let rescan = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.reload_topologies().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let late = dir.path().join("c.toml");
        std::fs::write(&late, GOOD).unwrap();
        svc.handle_event(TopologyEvent::Changed(late)).await;
        assert!(svc.active("c").is_some());

        drop(guard);
        let summary = rescan.await.unwrap().unwrap();
        assert!(summary.removed.is_empty());
        assert!(svc.active("a").is_some());
        assert!(svc.active("c").is_some());
    }

    #[tokio::test]
    async fn removal_event_unpublishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.toml");
        std::fs::write(&path, GOOD).unwrap();
        let svc = service(dir.path());
        svc.deploy_file(&path).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        svc.handle_event(TopologyEvent::Changed(path)).await;
        assert!(svc.active("gone").is_none());
        assert_eq!(svc.snapshot().len(), 0);
        assert!(!svc.locks.contains_key("gone"));
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn watcher_events_deploy_and_remove_topologies() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service(dir.path()));
        let (watcher, events) =
            crate::topology::TopologyWatcher::new(dir.path(), Duration::from_millis(100));
        let _watch = watcher.run().unwrap();
        let (stop, _) = broadcast::channel(1);
        let running = tokio::spawn(Arc::clone(&svc).run(events, None, stop.subscribe()));

        let path = dir.path().join("live.toml");
        std::fs::write(&path, GOOD).unwrap();
        assert!(eventually(|| svc.active("live").is_some()).await);

        std::fs::remove_file(&path).unwrap();
        assert!(eventually(|| svc.active("live").is_none()).await);

        stop.send(()).unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn generations_increase_across_redeploys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"{"service":[{"role":"AMBARI","urls":["http://h:1"]}]}"#).unwrap();
        let svc = service(dir.path());

        let a = svc.deploy_file(&path).await.unwrap().generation;
        let b = svc.deploy_file(&path).await.unwrap().generation;
        assert!(b > a);
    }
}
