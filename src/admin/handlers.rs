use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::health::{HealthReport, HealthStatus};
use crate::http::server::AppState;
use crate::session::SessionRecord;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: HealthStatus,
    pub open_sockets: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: state.layer.health().status,
        open_sockets: state.tracker.active_count(),
    })
}

pub async fn get_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.layer.health())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(logical_id): Path<String>,
) -> Result<Json<SessionRecord>, StatusCode> {
    state
        .layer
        .get_session(&logical_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
