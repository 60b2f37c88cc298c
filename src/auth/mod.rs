//! Authentication seam.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → middleware.rs (from_fn_with_state)
//!         → Authenticator::authenticate(headers)
//!         → Ok(Some(principal)): Principal extension, continue
//!         → Ok(None): anonymous, continue
//!         → Err: 401 with challenge; rewrite and dispatch never run
//! ```
//!
//! # Design Decisions
//! - Identity providers are external; the gateway only needs a principal name
//! - The static Basic table is for demos and tests, not production

pub mod basic;
pub mod middleware;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use thiserror::Error;

use crate::config::{AuthConfig, AuthMode};

pub use basic::StaticBasicAuth;
pub use middleware::auth_middleware;

/// The authenticated caller, stored as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials required")]
    Missing,

    #[error("malformed credentials")]
    Malformed,

    #[error("invalid credentials")]
    Invalid,
}

/// An external authentication provider.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AuthError>;

    /// `WWW-Authenticate` value sent with a 401.
    fn challenge(&self) -> Option<HeaderValue> {
        None
    }
}

/// Lets every request through without a principal.
#[derive(Debug, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<Principal>, AuthError> {
        Ok(None)
    }
}

/// Build the configured provider.
pub fn from_config(config: &AuthConfig) -> Arc<dyn Authenticator> {
    match config.mode {
        AuthMode::Anonymous => Arc::new(Anonymous),
        AuthMode::Basic => Arc::new(StaticBasicAuth::new(
            &config.realm,
            config
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone())),
        )),
    }
}
