use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::topology::{ReloadSummary, TopologyService, TopologyState, TopologyStatus};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_topologies: usize,
    pub failed_topologies: usize,
    pub service_definitions: usize,
}

pub async fn get_status(State(topologies): State<Arc<TopologyService>>) -> Json<SystemStatus> {
    let statuses = topologies.statuses();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_topologies: topologies.snapshot().len(),
        failed_topologies: statuses.iter().filter(|s| s.last_error.is_some()).count(),
        service_definitions: topologies.registry().len(),
    })
}

pub async fn get_topologies(
    State(topologies): State<Arc<TopologyService>>,
) -> Json<Vec<TopologyStatus>> {
    let mut statuses: Vec<TopologyStatus> = topologies
        .statuses()
        .into_iter()
        .filter(|s| s.state != TopologyState::Removed)
        .collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    Json(statuses)
}

pub async fn reload_topologies(
    State(topologies): State<Arc<TopologyService>>,
) -> Result<Json<ReloadSummary>, (StatusCode, Json<serde_json::Value>)> {
    tracing::info!("Topology reload requested via admin API");
    topologies
        .reload_topologies()
        .await
        .map(Json)
        .map_err(reload_failed)
}

pub async fn reload_services(
    State(topologies): State<Arc<TopologyService>>,
) -> Result<Json<ReloadSummary>, (StatusCode, Json<serde_json::Value>)> {
    tracing::info!("Service definition reload requested via admin API");
    topologies
        .reload_services()
        .await
        .map(Json)
        .map_err(reload_failed)
}

fn reload_failed(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %e, "Reload failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": { "code": "RELOAD_FAILED", "message": e.to_string() }
        })),
    )
}
