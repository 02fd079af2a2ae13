//! Heartbeat endpoints called by the game server SDK.
//!
//! Both routes accept a heartbeat, validate the status transition and answer
//! with the directive for the game server. An unknown session host gets a
//! 404 whose body still carries a `Terminate` directive, so orphaned game
//! servers shut themselves down.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use vmagent_protocol::{HeartbeatRequest, HeartbeatResponse, LegacyHeartbeatRequest};

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::types::ApiErrorResponse;

/// Process a heartbeat.
#[utoipa::path(
    post,
    path = "/v1/sessionHosts/{id}",
    tag = "Heartbeats",
    params(
        ("id" = String, Path, description = "Session host id")
    ),
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat accepted", body = HeartbeatResponse),
        (status = 400, description = "Malformed body or invalid status transition", body = ApiErrorResponse),
        (status = 404, description = "Unknown session host, told to terminate", body = HeartbeatResponse)
    )
)]
pub async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(session_host_id): Path<String>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<HeartbeatResponse>), ApiError> {
    let Json(request) = payload?;
    process_heartbeat(&state, &session_host_id, request)
}

/// Process a heartbeat sent in the legacy flattened shape.
#[utoipa::path(
    patch,
    path = "/v1/sessionHosts/{id}",
    tag = "Heartbeats",
    params(
        ("id" = String, Path, description = "Session host id")
    ),
    request_body = LegacyHeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat accepted", body = HeartbeatResponse),
        (status = 400, description = "Malformed body or invalid status transition", body = ApiErrorResponse),
        (status = 404, description = "Unknown session host, told to terminate", body = HeartbeatResponse)
    )
)]
pub async fn legacy_heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(session_host_id): Path<String>,
    payload: Result<Json<LegacyHeartbeatRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<HeartbeatResponse>), ApiError> {
    let Json(legacy) = payload?;
    process_heartbeat(&state, &session_host_id, legacy.into())
}

fn process_heartbeat(
    state: &ApiState,
    session_host_id: &str,
    request: HeartbeatRequest,
) -> Result<(StatusCode, Json<HeartbeatResponse>), ApiError> {
    let (exists, response) = state
        .manager()
        .try_process_heartbeat(session_host_id, request)?;
    let status = if exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(response)))
}
