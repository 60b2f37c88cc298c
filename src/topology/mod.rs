//! Topology subsystem.
//!
//! # Data Flow
//! ```text
//! topology_dir/<name>.toml | <name>.json
//!     → watcher.rs (notify → TopologyEvent over mpsc)
//!     → service.rs (per-topology lock, spawn_blocking)
//!         → parser.rs (bytes → TopologyDescriptor)
//!         → deploy::compile (→ RoutingContext)
//!     → ArcSwap<RoutingTable> (one atomic swap per change)
//!     → http front controller (one atomic read per request)
//! ```
//!
//! # Design Decisions
//! - The Topology Service is the only writer of the routing table
//! - Redeploys of one topology are serialized; different topologies proceed independently
//! - A failed deployment never disturbs the context already serving
//! - Periodic rescans back up the watcher; fingerprints keep them cheap

pub mod descriptor;
pub mod parser;
pub mod service;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::DeployError;
use crate::services::RegistryError;

pub use descriptor::{DescriptorFormat, ProviderConfig, ServiceBinding, TopologyDescriptor};
pub use parser::{parse_descriptor, ParseError};
pub use service::{ReloadSummary, RoutingTable, TopologyService, TopologyState, TopologyStatus};
pub use watcher::{TopologyEvent, TopologyWatcher};

/// Errors from deploying or managing topologies.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a topology descriptor", .0.display())]
    NotADescriptor(PathBuf),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("deployment error: {0}")]
    Deploy(#[from] DeployError),

    #[error("service registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("deployment task failed: {0}")]
    Join(String),
}
