//! The durable root of VM state and its read-only projections.

use super::{ResourceRetrievalResult, SessionHostInfo, SessionHostsStartInfo, VmState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vmagent_protocol::{ConnectedPlayer, GameHealth, MaintenanceSchedule, SessionHostStatus};

/// Current persisted format version.
pub const PERSISTED_FORMAT_VERSION: u32 = 1;

/// A diagnostic annotation on the VM, e.g. low disk space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmCondition {
    /// Condition value, e.g. "True".
    pub condition: String,
    /// When it was recorded.
    pub when_utc: DateTime<Utc>,
    /// Human-readable reason.
    pub reason: String,
}

/// Everything the agent needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmPersistedState {
    /// Format version of this document.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// VM assignment state.
    pub vm_state: VmState,
    /// Session hosts keyed by unique id.
    #[serde(default)]
    pub session_hosts_map: HashMap<String, SessionHostInfo>,
    /// Asset retrieval outcome.
    #[serde(default)]
    pub asset_retrieval_result: ResourceRetrievalResult,
    /// Image retrieval outcome.
    #[serde(default)]
    pub image_retrieval_result: ResourceRetrievalResult,
    /// Certificate installation outcome.
    #[serde(default)]
    pub certificate_retrieval_result: ResourceRetrievalResult,
    /// Current assignment payload.
    #[serde(default)]
    pub game_resource_details: Option<SessionHostsStartInfo>,
    /// Platform maintenance schedule.
    #[serde(default)]
    pub maintenance_schedule: Option<MaintenanceSchedule>,
    /// Gate that must be open before session hosts are created.
    #[serde(default)]
    pub is_startup_script_execution_complete: bool,
    /// Diagnostic annotations keyed by condition name.
    #[serde(default)]
    pub vm_conditions: HashMap<String, VmCondition>,
    /// When the current assignment arrived.
    #[serde(default)]
    pub assignment_time: Option<DateTime<Utc>>,
    /// Recent session host exits, newest last, for the restart-rate detector.
    #[serde(default)]
    pub restart_history: Vec<DateTime<Utc>>,
}

fn default_format_version() -> u32 {
    PERSISTED_FORMAT_VERSION
}

impl Default for VmPersistedState {
    fn default() -> Self {
        Self::unassigned()
    }
}

impl VmPersistedState {
    /// Fresh state for a VM with no workload.
    pub fn unassigned() -> Self {
        Self {
            format_version: PERSISTED_FORMAT_VERSION,
            vm_state: VmState::Unassigned,
            session_hosts_map: HashMap::new(),
            asset_retrieval_result: ResourceRetrievalResult::Unknown,
            image_retrieval_result: ResourceRetrievalResult::Unknown,
            certificate_retrieval_result: ResourceRetrievalResult::Unknown,
            game_resource_details: None,
            maintenance_schedule: None,
            is_startup_script_execution_complete: false,
            vm_conditions: HashMap::new(),
            assignment_time: None,
            restart_history: Vec::new(),
        }
    }

    /// Whether this build can read the document.
    pub fn is_compatible(&self) -> bool {
        self.format_version <= PERSISTED_FORMAT_VERSION
    }

    /// Copy with every secret nulled.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.game_resource_details = copy.game_resource_details.map(|d| d.redacted());
        copy
    }

    /// Logging-safe JSON. Never persist this.
    pub fn to_redacted_string(&self) -> String {
        serde_json::to_string(&self.redacted())
            .unwrap_or_else(|e| format!("<unserializable state: {}>", e))
    }

    /// Read-only projection exposed to callers.
    pub fn assignment_data(&self) -> AssignmentData {
        AssignmentData {
            assignment_id: self
                .game_resource_details
                .as_ref()
                .map(|d| d.assignment_id.clone()),
            vm_state: self.vm_state,
            session_hosts: self
                .session_hosts_map
                .iter()
                .map(|(id, host)| (id.clone(), SessionHostSnapshot::from(host)))
                .collect(),
            asset_retrieval_result: self.asset_retrieval_result,
            image_retrieval_result: self.image_retrieval_result,
        }
    }
}

/// Read-only view of the current assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentData {
    /// Current assignment, if any.
    pub assignment_id: Option<String>,
    /// VM state.
    pub vm_state: VmState,
    /// Per-host heartbeat snapshot.
    pub session_hosts: HashMap<String, SessionHostSnapshot>,
    /// Asset retrieval outcome.
    pub asset_retrieval_result: ResourceRetrievalResult,
    /// Image retrieval outcome.
    pub image_retrieval_result: ResourceRetrievalResult,
}

/// Latest heartbeat facts for one session host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHostSnapshot {
    /// Slot.
    pub instance_number: u32,
    /// Status.
    pub status: SessionHostStatus,
    /// Health.
    pub health: GameHealth,
    /// Players.
    pub players: Vec<ConnectedPlayer>,
    /// When the status last changed.
    pub last_state_transition_time: DateTime<Utc>,
    /// When the last heartbeat arrived.
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

impl From<&SessionHostInfo> for SessionHostSnapshot {
    fn from(host: &SessionHostInfo) -> Self {
        Self {
            instance_number: host.instance_number,
            status: host.current_status,
            health: host.current_game_health,
            players: host.current_players.clone(),
            last_state_transition_time: host.last_state_transition_time,
            last_heartbeat_time: host.last_heartbeat_time,
        }
    }
}
