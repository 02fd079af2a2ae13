//! Session host records and the status transition rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vmagent_protocol::{ConnectedPlayer, GameHealth, SessionConfig, SessionHostStatus};

/// How a session host is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SessionHostType {
    /// Runs inside a container.
    Container,
    /// Runs as a child process of the agent.
    Process,
}

impl std::fmt::Display for SessionHostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionHostType::Container => write!(f, "container"),
            SessionHostType::Process => write!(f, "process"),
        }
    }
}

/// Target the manager wants a session host to move to, delivered through
/// the next heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalState {
    /// Desired status.
    pub status: SessionHostStatus,
    /// Session to hand over with an `Active` goal.
    #[serde(default)]
    pub session_config: Option<SessionConfig>,
}

/// A session host on this VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHostInfo {
    /// Heartbeat identity; never reused within an assignment.
    pub unique_id: String,
    /// Container id (equal to `unique_id`) or OS pid. Empty until created.
    pub type_specific_id: String,
    /// Assignment this host serves.
    pub assignment_id: String,
    /// Slot on the VM; selects the instance folder and port mappings.
    pub instance_number: u32,
    /// Execution backend.
    pub host_type: SessionHostType,
    /// Last accepted status.
    pub current_status: SessionHostStatus,
    /// When `current_status` last changed.
    pub last_state_transition_time: DateTime<Utc>,
    /// Latches true the first time `StandingBy` is accepted.
    pub reached_standing_by: bool,
    /// Folder id under `logs/`.
    pub log_folder_id: String,
    /// Pending goal state, at most one.
    #[serde(default)]
    pub goal_state: Option<GoalState>,
    /// Session the host is hosting, once activated.
    #[serde(default)]
    pub session_config: Option<SessionConfig>,
    /// Crash dump state reported by the SDK.
    #[serde(default)]
    pub crash_dump_state: Option<String>,
    /// Whether the SDK reported profiling output.
    #[serde(default)]
    pub contains_profiling_output: bool,
    /// Last reported health.
    #[serde(default)]
    pub current_game_health: GameHealth,
    /// Last reported players.
    #[serde(default)]
    pub current_players: Vec<ConnectedPlayer>,
    /// When the placeholder was created.
    pub created_at: DateTime<Utc>,
    /// When the last heartbeat was processed.
    #[serde(default)]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

impl SessionHostInfo {
    /// New placeholder waiting for its first heartbeat.
    pub fn new_pending(
        unique_id: impl Into<String>,
        assignment_id: impl Into<String>,
        instance_number: u32,
        host_type: SessionHostType,
        log_folder_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            type_specific_id: String::new(),
            assignment_id: assignment_id.into(),
            instance_number,
            host_type,
            current_status: SessionHostStatus::PendingHeartbeat,
            last_state_transition_time: now,
            reached_standing_by: false,
            log_folder_id: log_folder_id.into(),
            goal_state: None,
            session_config: None,
            crash_dump_state: None,
            contains_profiling_output: false,
            current_game_health: GameHealth::Invalid,
            current_players: Vec::new(),
            created_at: now,
            last_heartbeat_time: None,
        }
    }

    /// The runner has created the backing process or container.
    pub fn is_created(&self) -> bool {
        !self.type_specific_id.is_empty()
    }

    /// Record an accepted status.
    ///
    /// Returns true when the status actually changed. A repeated status is
    /// a continuation and leaves the transition time alone.
    pub fn apply_status(&mut self, status: SessionHostStatus, now: DateTime<Utc>) -> bool {
        if status == SessionHostStatus::StandingBy {
            self.reached_standing_by = true;
        }
        if status == self.current_status {
            return false;
        }
        self.current_status = status;
        self.last_state_transition_time = now;
        true
    }
}

/// Whether a heartbeat may move a host from `from` to `to`.
///
/// A host that signalled readiness must never go back to initializing.
/// `Invalid` and `PendingHeartbeat` are agent-side states that no game
/// server may claim. Every other move is accepted.
pub fn is_valid_transition(from: SessionHostStatus, to: SessionHostStatus) -> bool {
    if !is_reportable_status(to) {
        return false;
    }
    !(from == SessionHostStatus::StandingBy && to == SessionHostStatus::Initializing)
}

/// Statuses a game server may report in a heartbeat.
pub fn is_reportable_status(status: SessionHostStatus) -> bool {
    !matches!(status, SessionHostStatus::Invalid | SessionHostStatus::PendingHeartbeat)
}

/// States in which a host counts as live for the VM's `Running` state.
pub fn is_live_status(status: SessionHostStatus) -> bool {
    matches!(
        status,
        SessionHostStatus::Initializing | SessionHostStatus::StandingBy | SessionHostStatus::Active
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionHostStatus; 8] = [
        SessionHostStatus::Invalid,
        SessionHostStatus::PendingHeartbeat,
        SessionHostStatus::Initializing,
        SessionHostStatus::StandingBy,
        SessionHostStatus::Active,
        SessionHostStatus::Terminating,
        SessionHostStatus::Terminated,
        SessionHostStatus::Quarantined,
    ];

    #[test]
    fn test_transition_rules() {
        for from in ALL {
            for to in ALL {
                let agent_only = matches!(
                    to,
                    SessionHostStatus::Invalid | SessionHostStatus::PendingHeartbeat
                );
                let regression = from == SessionHostStatus::StandingBy
                    && to == SessionHostStatus::Initializing;
                let expected = !agent_only && !regression;
                assert_eq!(is_valid_transition(from, to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_apply_status_updates_time_only_on_change() {
        let start = Utc::now();
        let mut host = SessionHostInfo::new_pending(
            "id",
            "title:build:region",
            0,
            SessionHostType::Process,
            "logs",
            start,
        );

        let later = start + chrono::Duration::seconds(5);
        assert!(host.apply_status(SessionHostStatus::Initializing, later));
        assert_eq!(host.last_state_transition_time, later);

        let even_later = later + chrono::Duration::seconds(5);
        assert!(!host.apply_status(SessionHostStatus::Initializing, even_later));
        assert_eq!(host.last_state_transition_time, later);
    }

    #[test]
    fn test_reached_standing_by_is_monotonic() {
        let now = Utc::now();
        let mut host =
            SessionHostInfo::new_pending("id", "a", 0, SessionHostType::Container, "logs", now);
        assert!(!host.reached_standing_by);

        for status in [
            SessionHostStatus::Initializing,
            SessionHostStatus::StandingBy,
            SessionHostStatus::Active,
            SessionHostStatus::Quarantined,
            SessionHostStatus::Terminating,
            SessionHostStatus::Terminated,
        ] {
            host.apply_status(status, now);
            if status != SessionHostStatus::Initializing {
                assert!(host.reached_standing_by, "reset after {}", status);
            }
        }
    }
}
