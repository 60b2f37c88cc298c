//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check URL-shaped settings actually parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AuthMode, GatewayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check the semantic constraints serde cannot express.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let path = config.gateway.path.trim_matches('/');
    if path.is_empty() || path.contains('/') {
        errors.push(ValidationError::new(
            "gateway.path",
            "must be a single non-empty path segment",
        ));
    }

    if let Some(frontend) = &config.gateway.frontend_url {
        match url::Url::parse(frontend) {
            Ok(url) if url.has_host() => {}
            _ => errors.push(ValidationError::new(
                "gateway.frontend_url",
                format!("'{}' is not an absolute URL", frontend),
            )),
        }
    }

    if config.dispatch.request_timeout_secs == 0 {
        errors.push(ValidationError::new("dispatch.request_timeout_secs", "must be > 0"));
    }
    if config.dispatch.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("dispatch.connect_timeout_secs", "must be > 0"));
    }
    if config.dispatch.max_buffered_response_bytes == 0 {
        errors.push(ValidationError::new(
            "dispatch.max_buffered_response_bytes",
            "must be > 0",
        ));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.auth.mode == AuthMode::Basic && config.auth.users.is_empty() {
        errors.push(ValidationError::new(
            "auth.users",
            "basic authentication needs at least one user",
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.len() < 16 {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be at least 16 characters",
            ));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn nested_gateway_path_rejected() {
        let mut config = GatewayConfig::default();
        config.gateway.path = "a/b".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "gateway.path");
    }

    #[test]
    fn relative_frontend_url_rejected() {
        let mut config = GatewayConfig::default();
        config.gateway.frontend_url = Some("/gateway".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "gateway.frontend_url");
    }
}
