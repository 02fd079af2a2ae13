//! Diagnostics handler.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::types::ApiErrorResponse;

/// Dump the persisted state with every secret removed.
#[utoipa::path(
    get,
    path = "/v1/state",
    tag = "Diagnostics",
    responses(
        (status = 200, description = "Redacted persisted state", content_type = "application/json"),
        (status = 500, description = "State could not be serialized", body = ApiErrorResponse)
    )
)]
pub async fn get_state(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let redacted = state.manager().snapshot().redacted();
    let value = serde_json::to_value(&redacted).map_err(ApiError::internal)?;
    Ok(Json(value))
}
