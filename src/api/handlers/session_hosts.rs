//! Session host goal state handler.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::types::{ApiErrorResponse, GoalStateRequest, GoalStateResponse};
use crate::api::validation::{validate_goal_status, validate_session_host_id};
use crate::state::GoalState;

/// Queue a goal state for a session host.
///
/// The goal is delivered on the host's next heartbeat. A second goal before
/// the first is consumed is rejected.
#[utoipa::path(
    put,
    path = "/v1/sessionHosts/{id}/goalState",
    tag = "Session Hosts",
    params(
        ("id" = String, Path, description = "Session host id")
    ),
    request_body = GoalStateRequest,
    responses(
        (status = 200, description = "Goal state queued", body = GoalStateResponse),
        (status = 400, description = "Invalid request", body = ApiErrorResponse),
        (status = 404, description = "Session host not found", body = ApiErrorResponse),
        (status = 409, description = "A goal state is already pending", body = ApiErrorResponse)
    )
)]
pub async fn set_goal_state(
    State(state): State<Arc<ApiState>>,
    Path(session_host_id): Path<String>,
    payload: Result<Json<GoalStateRequest>, JsonRejection>,
) -> Result<Json<GoalStateResponse>, ApiError> {
    validate_session_host_id(&session_host_id)?;
    let Json(req) = payload?;
    validate_goal_status(req.status)?;

    let manager = state.manager();
    if manager.session_host(&session_host_id).is_none() {
        return Err(crate::Error::session_host_not_found(&session_host_id).into());
    }

    let goal = GoalState {
        status: req.status,
        session_config: req.session_config,
    };
    if !manager.try_set_goal_state_info(&session_host_id, goal) {
        return Err(ApiError::Conflict(format!(
            "goal state already pending for session host {}",
            session_host_id
        )));
    }

    Ok(Json(GoalStateResponse {
        session_host_id,
        status: req.status,
    }))
}
