//! JSON request and response types for the control API.
//!
//! Heartbeat bodies are the protocol types from `vmagent-protocol`; the
//! assignment document is [`crate::state::SessionHostsStartInfo`]. Everything
//! else the API speaks is defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vmagent_protocol::{ConnectedPlayer, GameHealth, SessionConfig, SessionHostStatus};

use crate::state::ResourceRetrievalResult;

// ============================================================================
// Assignment Types
// ============================================================================

/// Result of an assignment request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignResponse {
    /// Assignment now bound to the VM.
    #[schema(example = "title:build:region")]
    pub assignment_id: String,
    /// "accepted" for a new assignment, "alreadyAssigned" for a repeat.
    #[schema(example = "accepted")]
    pub outcome: String,
    /// VM state after the request.
    #[schema(example = "Assigned")]
    pub vm_state: String,
}

/// Request to unassign the VM.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnassignRequest {
    /// Assignment being released; must match the one held.
    #[schema(example = "title:build:region")]
    pub assignment_id: String,
}

/// VM state after a state-changing request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmStateResponse {
    /// State name.
    #[schema(example = "PendingResourceCleanup")]
    pub vm_state: String,
    /// Stable numeric value of the state.
    #[schema(example = 10)]
    pub vm_state_ordinal: u8,
}

/// Latest heartbeat facts for one session host.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionHostSummary {
    /// Session host id.
    pub session_host_id: String,
    /// Instance slot.
    pub instance_number: u32,
    /// Last accepted status.
    pub status: SessionHostStatus,
    /// Last reported health.
    pub health: GameHealth,
    /// Connected players.
    pub players: Vec<ConnectedPlayer>,
    /// When the status last changed.
    pub last_state_transition_time: DateTime<Utc>,
    /// When the last heartbeat arrived.
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

/// Read-only view of the current assignment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDataResponse {
    /// Current assignment, if any.
    pub assignment_id: Option<String>,
    /// VM state name.
    #[schema(example = "Running")]
    pub vm_state: String,
    /// Stable numeric value of the state.
    #[schema(example = 9)]
    pub vm_state_ordinal: u8,
    /// Session hosts ordered by instance slot.
    pub session_hosts: Vec<SessionHostSummary>,
    /// Asset retrieval outcome.
    pub asset_retrieval_result: ResourceRetrievalResult,
    /// Image retrieval outcome.
    pub image_retrieval_result: ResourceRetrievalResult,
}

// ============================================================================
// Session Host Types
// ============================================================================

/// Goal state to deliver to a session host on its next heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalStateRequest {
    /// Desired status; `Active` or `Terminated`.
    pub status: SessionHostStatus,
    /// Session handed to the game server with an `Active` goal.
    #[serde(default)]
    pub session_config: Option<SessionConfig>,
}

/// Goal state accepted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalStateResponse {
    /// Session host the goal was queued for.
    pub session_host_id: String,
    /// Queued status.
    pub status: SessionHostStatus,
}

// ============================================================================
// Maintenance Types
// ============================================================================

/// Maintenance schedule stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceResponse {
    /// Events in the stored schedule.
    pub events: usize,
    /// Earliest upcoming maintenance start.
    pub next_maintenance_utc: Option<DateTime<Utc>>,
}

// ============================================================================
// Health & Error Types
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status.
    #[schema(example = "ok")]
    pub status: &'static str,
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: &'static str,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    #[schema(example = "NOT_FOUND")]
    pub code: String,
}
