//! Service Definition Registry subsystem.
//!
//! # Data Flow
//! ```text
//! services_dir/**/service.toml
//!     → definition.rs (serde → ServiceDefinitionFile → compile)
//!     → registry.rs ((role, version) → Arc<ServiceDefinition>)
//!     → deploy (resolve per topology binding)
//! ```
//!
//! # Design Decisions
//! - Definitions are immutable once loaded; a reload builds a whole new registry
//! - A broken definition is recorded, not fatal; only topologies using it fail
//! - Roles are case-insensitive and stored upper-case

pub mod definition;
pub mod registry;
pub mod version;

pub use definition::{
    path_segments, DefinitionError, DispatchContract, IdentityPolicy, ServiceDefinition,
    ServiceDefinitionFile,
};
pub use registry::{LookupError, RegistryError, ServiceRegistry};
pub use version::ServiceVersion;
