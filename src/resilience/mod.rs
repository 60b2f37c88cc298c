//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend call (dispatch):
//!     → timeouts.rs (request deadline)
//!     → on connection failure: retries.rs (idempotent? attempts left?)
//!     → backoff.rs (jittered exponential pause)
//!     → next failover target
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Retries only for idempotent requests (GET, HEAD, PUT, DELETE, ...)
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{is_retryable, RetryPolicy};
pub use timeouts::{with_deadline, Elapsed};
