//! API server state.

use crate::api::types::{AssignmentDataResponse, SessionHostSummary, VmStateResponse};
use crate::lifecycle::SessionHostsManager;
use crate::state::{AssignmentData, VmState};
use std::sync::Arc;

/// Shared API server state.
pub struct ApiState {
    manager: Arc<SessionHostsManager>,
}

impl ApiState {
    /// Create the API state over a lifecycle manager.
    pub fn new(manager: Arc<SessionHostsManager>) -> Self {
        Self { manager }
    }

    /// The lifecycle manager.
    pub fn manager(&self) -> &Arc<SessionHostsManager> {
        &self.manager
    }
}

// ============================================================================
// Type Conversions
// ============================================================================

/// Convert a VM state to its response body.
pub fn vm_state_response(state: VmState) -> VmStateResponse {
    VmStateResponse {
        vm_state: state.to_string(),
        vm_state_ordinal: state.ordinal(),
    }
}

/// Convert AssignmentData to its response body, hosts ordered by slot.
pub fn assignment_data_response(data: AssignmentData) -> AssignmentDataResponse {
    let mut session_hosts: Vec<SessionHostSummary> = data
        .session_hosts
        .into_iter()
        .map(|(id, host)| SessionHostSummary {
            session_host_id: id,
            instance_number: host.instance_number,
            status: host.status,
            health: host.health,
            players: host.players,
            last_state_transition_time: host.last_state_transition_time,
            last_heartbeat_time: host.last_heartbeat_time,
        })
        .collect();
    session_hosts.sort_by_key(|h| h.instance_number);

    AssignmentDataResponse {
        assignment_id: data.assignment_id,
        vm_state: data.vm_state.to_string(),
        vm_state_ordinal: data.vm_state.ordinal(),
        session_hosts,
        asset_retrieval_result: data.asset_retrieval_result,
        image_retrieval_result: data.image_retrieval_result,
    }
}
