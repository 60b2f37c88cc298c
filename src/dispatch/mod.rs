//! Dispatch Layer subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest (headers and body already under inbound policy)
//!     → dispatcher.rs
//!         → failover order (round-robin start across targets)
//!         → per target: inbound URL rewrite → build request (Host, Content-Length)
//!         → client.rs (connect timeout, request deadline)
//!         → connection failure + idempotent: backoff, next target
//!     → Dispatched { response head, answering target }
//!     → http response pipeline (stream, or body.rs bounded buffering for rewrite)
//! ```
//!
//! # Design Decisions
//! - Non-2xx backend answers are responses, not errors
//! - Response bodies stream unless a content filter needs the whole document
//! - Buffering is bounded; exceeding the bound is a 502, never an allocation spike
//! - Client disconnect drops the handler future and with it the backend call

pub mod body;
pub mod client;
pub mod dispatcher;
pub mod headers;

use std::time::Duration;

use thiserror::Error;

use crate::rewrite::RewriteError;

pub use body::{collect_limited, BodyError};
pub use client::BackendClient;
pub use dispatcher::{target_url, Dispatched, Dispatcher, OutboundRequest};

/// Per-request failures of the Dispatch Layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend {target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("backend {target} did not answer within {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("backend response exceeds the {limit} byte rewrite buffer")]
    ResponseTooLarge { limit: usize },

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("failed reading body: {0}")]
    Body(String),

    #[error("rewritten target '{url}' is not a valid URI: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("service has no backend targets")]
    NoTargets,

    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}
