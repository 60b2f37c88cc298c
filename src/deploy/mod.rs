//! Deployment Engine subsystem.
//!
//! # Data Flow
//! ```text
//! TopologyDescriptor + ServiceRegistry
//!     → compiler.rs
//!         → resolve (role, version) per binding
//!         → bind rules once per backend URL ({$serviceUrl} → literal authority)
//!         → check prefixes for ambiguity
//!     → context.rs (RoutingContext, immutable)
//!     → topology::service (atomic publish)
//! ```
//!
//! # Design Decisions
//! - All-or-nothing: any binding error fails the whole topology
//! - Runs off the request path (spawn_blocking in the topology service)
//! - Nested prefixes are legal and resolved longest first; identical ones are not

pub mod compiler;
pub mod context;

use thiserror::Error;

use crate::rewrite::RuleError;
use crate::services::LookupError;

pub use compiler::compile;
pub use context::{BoundTarget, DispatchDescriptor, RoutingContext};

/// Why a topology could not be compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("service '{role}': {source}")]
    Lookup {
        role: String,
        #[source]
        source: LookupError,
    },

    #[error("service '{role}': {source}")]
    Rule {
        role: String,
        #[source]
        source: RuleError,
    },

    #[error("service '{role}' has an empty path prefix")]
    EmptyPrefix { role: String },

    #[error("services '{first}' and '{second}' both claim prefix '{prefix}'")]
    AmbiguousPrefix {
        prefix: String,
        first: String,
        second: String,
    },
}
