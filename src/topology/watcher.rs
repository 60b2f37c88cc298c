//! Descriptor directory watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::topology::descriptor::topology_name;

/// A change notification for the Topology Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A descriptor was created, modified or removed.
    Changed(PathBuf),
    /// Notifications may have been lost; rescan everything.
    Rescan,
}

/// Watches the topology directory and forwards descriptor changes.
pub struct TopologyWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<TopologyEvent>,
}

impl TopologyWatcher {
    /// Create a watcher and the receiving end of its event stream.
    pub fn new(
        dir: &Path,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TopologyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                dir: dir.to_path_buf(),
                poll_interval,
                tx,
            },
            rx,
        )
    }

    /// A sender for injecting events, e.g. from the reload signal.
    pub fn sender(&self) -> mpsc::UnboundedSender<TopologyEvent> {
        self.tx.clone()
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if topology_name(&path).is_some() {
                            tracing::debug!(
                                path = %path.display(),
                                kind = ?event.kind,
                                "Descriptor change detected"
                            );
                            let _ = tx.send(TopologyEvent::Changed(path));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Topology watch error; scheduling rescan");
                    let _ = tx.send(TopologyEvent::Rescan);
                }
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::info!(directory = %self.dir.display(), "Topology watcher started");
        Ok(watcher)
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    kind.is_create() || kind.is_modify() || kind.is_remove()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn only_content_changes_are_relevant() {
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Any)));
    }
}
