//! Gateway error responses.

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::rewrite::RewriteError;

/// Everything the front controller can answer with instead of a backend response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no gateway resource at '{0}'")]
    NotFound(String),

    #[error("topology '{0}' is not deployed")]
    TopologyNotFound(String),

    #[error("no service of topology '{topology}' serves '{path}'")]
    ServiceNotFound { topology: String, path: String },

    #[error("method {method} is not allowed for this service")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    #[error("authentication required: {reason}")]
    Unauthenticated {
        reason: String,
        challenge: Option<HeaderValue>,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        self.parts().0
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            GatewayError::TopologyNotFound(_) => (StatusCode::NOT_FOUND, "TOPOLOGY_NOT_FOUND"),
            GatewayError::ServiceNotFound { .. } => (StatusCode::NOT_FOUND, "SERVICE_NOT_FOUND"),
            GatewayError::MethodNotAllowed { .. } => {
                (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED")
            }
            GatewayError::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            GatewayError::Dispatch(e) => match e {
                DispatchError::Unreachable { .. } | DispatchError::NoTargets => {
                    (StatusCode::BAD_GATEWAY, "BACKEND_UNREACHABLE")
                }
                DispatchError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "BACKEND_TIMEOUT"),
                DispatchError::ResponseTooLarge { .. } => {
                    (StatusCode::BAD_GATEWAY, "RESPONSE_TOO_LARGE")
                }
                DispatchError::Body(_) => (StatusCode::BAD_GATEWAY, "BACKEND_BODY_ERROR"),
                DispatchError::RequestTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "REQUEST_TOO_LARGE")
                }
                DispatchError::InvalidTarget { .. } | DispatchError::Rewrite(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "REWRITE_FAILED")
                }
            },
            GatewayError::Rewrite(_) => (StatusCode::INTERNAL_SERVER_ERROR, "REWRITE_FAILED"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        match &self {
            GatewayError::MethodNotAllowed { allowed, .. } => {
                let list = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&list) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
            }
            GatewayError::Unauthenticated {
                challenge: Some(challenge),
                ..
            } => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge.clone());
            }
            _ => {}
        }
        response
    }
}
