//! Assignment lifecycle handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::{assignment_data_response, vm_state_response, ApiState};
use crate::api::types::{
    ApiErrorResponse, AssignResponse, AssignmentDataResponse, UnassignRequest, VmStateResponse,
};
use crate::api::validation::validate_start_info;
use crate::lifecycle::AssignOutcome;
use crate::state::SessionHostsStartInfo;

/// Bind an assignment to the VM and start propping.
#[utoipa::path(
    post,
    path = "/v1/assignment",
    tag = "Assignment",
    request_body = SessionHostsStartInfo,
    responses(
        (status = 200, description = "Assignment accepted or already held", body = AssignResponse),
        (status = 400, description = "Invalid assignment document", body = ApiErrorResponse),
        (status = 409, description = "VM holds a different assignment", body = ApiErrorResponse)
    )
)]
pub async fn assign(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SessionHostsStartInfo>, JsonRejection>,
) -> Result<Json<AssignResponse>, ApiError> {
    let Json(start_info) = payload?;
    validate_start_info(&start_info)?;

    let assignment_id = start_info.assignment_id.clone();
    let manager = state.manager().clone();
    let assigning = manager.clone();
    let outcome = tokio::task::spawn_blocking(move || assigning.assign_and_start(start_info));
    let outcome = match outcome.await?? {
        AssignOutcome::Accepted => "accepted",
        AssignOutcome::AlreadyAssigned => "alreadyAssigned",
    };

    Ok(Json(AssignResponse {
        assignment_id,
        outcome: outcome.to_string(),
        vm_state: manager.vm_state().to_string(),
    }))
}

/// Read the current assignment.
#[utoipa::path(
    get,
    path = "/v1/assignment",
    tag = "Assignment",
    responses(
        (status = 200, description = "Current assignment", body = AssignmentDataResponse)
    )
)]
pub async fn get_assignment(State(state): State<Arc<ApiState>>) -> Json<AssignmentDataResponse> {
    Json(assignment_data_response(state.manager().assignment_data()))
}

/// Request unassignment; teardown runs in the background.
#[utoipa::path(
    post,
    path = "/v1/assignment/unassign",
    tag = "Assignment",
    request_body = UnassignRequest,
    responses(
        (status = 200, description = "Teardown requested", body = VmStateResponse),
        (status = 400, description = "Malformed body", body = ApiErrorResponse),
        (status = 409, description = "Different or no assignment held", body = ApiErrorResponse)
    )
)]
pub async fn unassign(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<UnassignRequest>, JsonRejection>,
) -> Result<Json<VmStateResponse>, ApiError> {
    let Json(req) = payload?;
    let manager = state.manager().clone();
    let vm_state =
        tokio::task::spawn_blocking(move || manager.unassign(&req.assignment_id)).await??;
    Ok(Json(vm_state_response(vm_state)))
}

/// Return a torn down VM to `Unassigned`.
#[utoipa::path(
    post,
    path = "/v1/assignment/complete",
    tag = "Assignment",
    responses(
        (status = 200, description = "VM unassigned", body = VmStateResponse),
        (status = 409, description = "Teardown not finished", body = ApiErrorResponse)
    )
)]
pub async fn complete_unassignment(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<VmStateResponse>, ApiError> {
    let manager = state.manager().clone();
    let vm_state = tokio::task::spawn_blocking(move || {
        manager.complete_unassignment()?;
        Ok::<_, crate::Error>(manager.vm_state())
    })
    .await??;
    Ok(Json(vm_state_response(vm_state)))
}
