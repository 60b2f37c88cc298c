//! Retry policy for backend dispatch.
//!
//! # Design Decisions
//! - Only idempotent methods are retried
//! - Only connection failures are retried; a backend status, even 5xx, is an answer
//! - Routing and rewriting are deterministic and never retried

use std::time::Duration;

use axum::http::Method;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Whether a failed attempt with `method` may be repeated.
pub fn is_retryable(method: &Method, connect_failure: bool) -> bool {
    connect_failure && method.is_idempotent()
}

/// Bounded retry schedule derived from configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Total attempts allowed for `method`, the first one included.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if self.enabled && method.is_idempotent() {
            self.max_attempts
        } else {
            1
        }
    }

    /// Pause before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}
