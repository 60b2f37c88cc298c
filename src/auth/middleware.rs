//! Authentication middleware for the gateway surface.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::Authenticator;
use crate::http::GatewayError;

pub async fn auth_middleware(
    State(auth): State<Arc<dyn Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match auth.authenticate(request.headers()) {
        Ok(Some(principal)) => {
            tracing::debug!(principal = %principal.name, "Authenticated");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) => {
            tracing::info!(path = %request.uri().path(), reason = %e, "Authentication failed");
            GatewayError::Unauthenticated {
                reason: e.to_string(),
                challenge: auth.challenge(),
            }
            .into_response()
        }
    }
}
