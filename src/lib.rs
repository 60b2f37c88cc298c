//! Topology gateway library.
//!
//! A perimeter reverse proxy that serves many named topologies under one
//! mount point. Each topology binds service roles to backend URLs; each role
//! brings a service definition of rewrite rules and a dispatch contract.

// Stores and compilation
pub mod config;
pub mod deploy;
pub mod rewrite;
pub mod services;
pub mod topology;

// Request path
pub mod auth;
pub mod dispatch;
pub mod http;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use topology::TopologyService;
