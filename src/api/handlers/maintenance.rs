//! Scheduled maintenance handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use vmagent_protocol::MaintenanceSchedule;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::types::{ApiErrorResponse, MaintenanceResponse};

/// Store a maintenance schedule and surface it on every heartbeat.
#[utoipa::path(
    put,
    path = "/v1/maintenance",
    tag = "Maintenance",
    request_body = MaintenanceSchedule,
    responses(
        (status = 200, description = "Schedule stored", body = MaintenanceResponse),
        (status = 400, description = "Malformed body", body = ApiErrorResponse)
    )
)]
pub async fn set_maintenance(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<MaintenanceSchedule>, JsonRejection>,
) -> Result<Json<MaintenanceResponse>, ApiError> {
    let Json(schedule) = payload?;
    let response = MaintenanceResponse {
        events: schedule.maintenance_events.len(),
        next_maintenance_utc: schedule.next_maintenance_utc(),
    };

    let manager = state.manager().clone();
    tokio::task::spawn_blocking(move || manager.mark_for_maintenance(schedule)).await?;
    Ok(Json(response))
}
