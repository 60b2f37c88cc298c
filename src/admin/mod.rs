//! Management API.
//!
//! # Routes
//! - `GET /admin/status`: version, active/failed topology counts
//! - `GET /admin/topologies`: state, generation and last error per topology
//! - `POST /admin/topologies/reload`: rescan the descriptor directory
//! - `POST /admin/services/reload`: reload service definitions, redeploy all
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::topology::TopologyService;

pub fn setup_admin_router(topologies: Arc<TopologyService>, api_key: &str) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/topologies", get(get_topologies))
        .route("/admin/topologies/reload", post(reload_topologies))
        .route("/admin/services/reload", post(reload_services))
        .layer(middleware::from_fn_with_state(
            Arc::<str>::from(api_key),
            admin_auth_middleware,
        ))
        .with_state(topologies)
}
