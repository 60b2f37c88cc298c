//! Gateway Front Controller.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, trace span, authentication)
//!     → request.rs (/<mount>/<topology>/<service path>)
//!     → Active Routing Table: one atomic read → RoutingContext snapshot
//!     → longest-prefix service match → method check
//!     → request.rs (inbound header / identity / body policy)
//!     → dispatch layer (target URL rewrite, failover)
//!     → response.rs (outbound header and body rewrite, or streaming)
//!     → client
//! ```
//!
//! # Design Decisions
//! - A request holds its RoutingContext snapshot to the end; redeploys never
//!   change routing mid-request
//! - Failures before the first response byte are JSON error bodies (error.rs);
//!   once a streamed backend body has started, a backend failure truncates it
//! - No lock is held across the backend call

pub mod error;
pub mod request;
pub mod response;
pub mod server;

pub use error::GatewayError;
pub use request::{frontend_url, GatewayPath};
pub use server::{AppState, HttpServer, X_REQUEST_ID};
