//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Where topologies and service definitions live, and how the gateway is mounted.
    pub gateway: GatewaySettings,

    /// Backend dispatch limits and timeouts.
    pub dispatch: DispatchConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Authentication provider selection.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
        }
    }
}

/// Gateway mount point and descriptor stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// First path segment of every gateway URL (`/<path>/<topology>/...`).
    pub path: String,

    /// Directory holding one descriptor file per topology.
    pub topology_dir: String,

    /// Directory tree holding `service.toml` definitions.
    pub services_dir: String,

    /// Client-facing base URL (e.g. "https://gw.example.com:8443").
    /// When unset it is derived from each request's Host header.
    pub frontend_url: Option<String>,

    /// Watch `topology_dir` for changes.
    pub watch_topologies: bool,

    /// Poll interval for the file watcher backend, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            path: "gateway".to_string(),
            topology_dir: "conf/topologies".to_string(),
            services_dir: "data/services".to_string(),
            frontend_url: None,
            watch_topologies: true,
            poll_interval_secs: 2,
        }
    }
}

/// Limits and timeouts for calls to backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time allowed for a backend to produce response headers, in seconds.
    pub request_timeout_secs: u64,

    /// Upper bound for response bodies that must be buffered for rewriting.
    pub max_buffered_response_bytes: usize,

    /// Upper bound for request bodies that must be buffered (retry or rewrite).
    pub max_request_body_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            max_buffered_response_bytes: 8 * 1024 * 1024, // 8MB
            max_request_body_bytes: 2 * 1024 * 1024,      // 2MB
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Which authentication provider guards the gateway.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every request is let through as an anonymous principal.
    #[default]
    Anonymous,
    /// HTTP Basic against the static `users` table.
    Basic,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// Realm advertised in `WWW-Authenticate`.
    pub realm: String,

    /// Static credential table for `basic` mode.
    pub users: Vec<UserCredential>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Anonymous,
            realm: "gateway".to_string(),
            users: Vec::new(),
        }
    }
}

/// A username/password pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8444".to_string(),
        }
    }
}
