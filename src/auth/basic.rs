//! HTTP Basic authentication against a static credential table.

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::auth::{AuthError, Authenticator, Principal};

pub struct StaticBasicAuth {
    realm: String,
    users: HashMap<String, String>,
}

impl StaticBasicAuth {
    pub fn new(realm: &str, users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            realm: realm.to_string(),
            users: users.into_iter().collect(),
        }
    }
}

impl Authenticator for StaticBasicAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AuthError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;
        let (scheme, encoded) = value.split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::Missing);
        }
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (user, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;

        match self.users.get(user) {
            Some(expected) if expected == password => Ok(Some(Principal {
                name: user.to_string(),
            })),
            _ => Err(AuthError::Invalid),
        }
    }

    fn challenge(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm)).ok()
    }
}
