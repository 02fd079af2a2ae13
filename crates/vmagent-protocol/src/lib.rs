//! Protocol types for the game server heartbeat protocol.
//!
//! Every session host runs a game server linked against the game server SDK
//! (GSDK). The SDK reports its state to the VM agent over HTTP at a fixed
//! cadence and receives a directive back.
//!
//! ```text
//! GSDK                                   vmagent
//!  |  POST /v1/sessionHosts/{id}           |
//!  |  { CurrentGameState, ... }  ------->  |
//!  |                                       |  validate transition
//!  |  <-------  { operation, ... }         |  compute directive
//! ```
//!
//! Request bodies use PascalCase keys (camelCase is accepted too), response
//! bodies use camelCase keys, matching what the SDKs send and parse.

#![deny(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default interval the SDK should wait between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u32 = 1000;

// ============================================================================
// Session Host Status
// ============================================================================

/// Status of a session host, as reported by its SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum SessionHostStatus {
    /// Initial value, never reported by a real host.
    #[default]
    Invalid,
    /// Created but no heartbeat received yet.
    PendingHeartbeat,
    /// Game server is loading.
    Initializing,
    /// Ready to receive players.
    StandingBy,
    /// Allocated and hosting a session.
    Active,
    /// Shutting down.
    Terminating,
    /// Exited.
    Terminated,
    /// Taken out of rotation for investigation.
    Quarantined,
}

impl std::fmt::Display for SessionHostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionHostStatus::Invalid => "Invalid",
            SessionHostStatus::PendingHeartbeat => "PendingHeartbeat",
            SessionHostStatus::Initializing => "Initializing",
            SessionHostStatus::StandingBy => "StandingBy",
            SessionHostStatus::Active => "Active",
            SessionHostStatus::Terminating => "Terminating",
            SessionHostStatus::Terminated => "Terminated",
            SessionHostStatus::Quarantined => "Quarantined",
        };
        f.write_str(name)
    }
}

/// Game health as reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum GameHealth {
    /// Not reported.
    #[default]
    Invalid,
    /// Healthy.
    Healthy,
    /// Unhealthy.
    Unhealthy,
}

/// Directive returned to the SDK in a heartbeat response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum Operation {
    /// Not set. Kept for wire compatibility.
    Invalid,
    /// Nothing to do.
    #[default]
    Continue,
    /// Legacy directive asking the SDK to re-read its manifest.
    GetManifest,
    /// Legacy directive asking the game server to quarantine itself.
    Quarantine,
    /// The session host was allocated; start the session described by the config.
    Active,
    /// The game server must exit.
    Terminate,
}

// ============================================================================
// Heartbeat Payloads
// ============================================================================

/// A player connected to a session host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectedPlayer {
    /// Player identifier chosen by the game.
    #[serde(rename = "PlayerId", alias = "playerId")]
    pub player_id: String,
}

/// Session data handed to an allocated game server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Session identifier.
    #[serde(default, alias = "SessionId")]
    pub session_id: Option<String>,
    /// Opaque cookie supplied by the allocator.
    #[serde(default, alias = "SessionCookie")]
    pub session_cookie: Option<String>,
    /// Players expected to join.
    #[serde(default, alias = "InitialPlayers")]
    pub initial_players: Vec<String>,
    /// Free-form metadata supplied by the allocator.
    #[serde(default, alias = "Metadata")]
    pub metadata: HashMap<String, String>,
}

/// Port declared by the game server build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct GamePort {
    /// Port name referenced by the game server.
    #[serde(alias = "name")]
    pub name: String,
    /// Port the game server listens on.
    #[serde(alias = "number")]
    pub number: u16,
    /// "TCP" or "UDP".
    #[serde(alias = "protocol")]
    pub protocol: String,
}

/// Mapping of a game port to the port exposed by the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PortMapping {
    /// Port reachable from the public internet.
    #[serde(alias = "publicPort")]
    pub public_port: u16,
    /// Port bound on the VM.
    #[serde(alias = "nodePort")]
    pub node_port: u16,
    /// Port inside the game server.
    #[serde(alias = "gamePort")]
    pub game_port: GamePort,
}

/// Heartbeat sent by the SDK on the current route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatRequest {
    /// Status the game server claims to be in.
    #[serde(alias = "currentGameState")]
    pub current_game_state: SessionHostStatus,
    /// Reported health.
    #[serde(default, alias = "currentGameHealth")]
    pub current_game_health: GameHealth,
    /// Connected players.
    #[serde(default, alias = "currentPlayers")]
    pub current_players: Vec<ConnectedPlayer>,
    /// Session the game server believes it is hosting.
    #[serde(default, alias = "sessionConfig", skip_serializing_if = "Option::is_none")]
    pub session_config: Option<SessionConfig>,
    /// Port mappings the game server was started with.
    #[serde(default, alias = "portMappings", skip_serializing_if = "Option::is_none")]
    pub port_mappings: Option<Vec<PortMapping>>,
    /// Maintenance time the SDK last saw.
    #[serde(
        default,
        alias = "nextScheduledMaintenanceUtc",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_scheduled_maintenance_utc: Option<DateTime<Utc>>,
    /// Assignment the game server was started for.
    #[serde(default, alias = "assignmentId", skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    /// Crash dump upload state.
    #[serde(default, alias = "crashDumpState", skip_serializing_if = "Option::is_none")]
    pub crash_dump_state: Option<String>,
    /// Whether the game server wrote profiling output.
    #[serde(default, alias = "containsProfilingOutput", skip_serializing_if = "Option::is_none")]
    pub contains_profiling_output: Option<bool>,
}

/// Heartbeat shape sent by older SDKs on the legacy route.
///
/// Players are a flat list of ids and there is no session or port data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyHeartbeatRequest {
    /// Claimed status.
    #[serde(alias = "state")]
    pub state: SessionHostStatus,
    /// Reported health.
    #[serde(default, alias = "health")]
    pub health: GameHealth,
    /// Connected player ids.
    #[serde(default, alias = "players")]
    pub players: Vec<String>,
}

impl From<LegacyHeartbeatRequest> for HeartbeatRequest {
    fn from(legacy: LegacyHeartbeatRequest) -> Self {
        Self {
            current_game_state: legacy.state,
            current_game_health: legacy.health,
            current_players: legacy
                .players
                .into_iter()
                .map(|player_id| ConnectedPlayer { player_id })
                .collect(),
            ..Default::default()
        }
    }
}

/// Response to a heartbeat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Status the agent recorded for the session host.
    pub current_game_state: SessionHostStatus,
    /// When the SDK should send the next heartbeat.
    pub next_heartbeat_interval_ms: u32,
    /// Directive for the game server.
    pub operation: Operation,
    /// Session to start, present with [`Operation::Active`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_config: Option<SessionConfig>,
    /// Upcoming maintenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_schedule: Option<MaintenanceSchedule>,
    /// Earliest upcoming maintenance start, for SDKs that only read the time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_maintenance_utc: Option<DateTime<Utc>>,
}

impl HeartbeatResponse {
    /// Response telling an unknown or evicted session host to exit.
    pub fn terminate() -> Self {
        Self {
            current_game_state: SessionHostStatus::Invalid,
            next_heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            operation: Operation::Terminate,
            ..Default::default()
        }
    }
}

// ============================================================================
// Maintenance Schedule
// ============================================================================

/// Scheduled maintenance document from the platform metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct MaintenanceSchedule {
    /// Incarnation of the document; changes whenever the schedule changes.
    #[serde(default, alias = "documentIncarnation")]
    pub document_incarnation: String,
    /// Upcoming events.
    #[serde(default, alias = "maintenanceEvents")]
    pub maintenance_events: Vec<MaintenanceEvent>,
}

impl MaintenanceSchedule {
    /// Earliest `NotBefore` across all events.
    pub fn next_maintenance_utc(&self) -> Option<DateTime<Utc>> {
        self.maintenance_events
            .iter()
            .filter_map(|e| e.not_before)
            .min()
    }
}

/// A single maintenance event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct MaintenanceEvent {
    /// Event identifier.
    #[serde(alias = "eventId")]
    pub event_id: String,
    /// e.g. "Reboot", "Redeploy", "Freeze".
    #[serde(default, alias = "eventType")]
    pub event_type: String,
    /// e.g. "Scheduled", "Started".
    #[serde(default, alias = "eventStatus")]
    pub event_status: String,
    /// Earliest time the event may start.
    #[serde(default, alias = "notBefore")]
    pub not_before: Option<DateTime<Utc>>,
    /// "Platform" or "User".
    #[serde(default, alias = "eventSource")]
    pub event_source: String,
    /// Expected duration.
    #[serde(default, alias = "durationInSeconds")]
    pub duration_in_seconds: i64,
    /// Affected resources.
    #[serde(default, alias = "resources")]
    pub resources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_request_accepts_both_key_styles() {
        let pascal = r#"{
            "CurrentGameState": "StandingBy",
            "CurrentGameHealth": "Healthy",
            "CurrentPlayers": [{"PlayerId": "p1"}]
        }"#;
        let camel = r#"{
            "currentGameState": "StandingBy",
            "currentGameHealth": "Healthy",
            "currentPlayers": [{"playerId": "p1"}]
        }"#;

        for body in [pascal, camel] {
            let req: HeartbeatRequest = serde_json::from_str(body).unwrap();
            assert_eq!(req.current_game_state, SessionHostStatus::StandingBy);
            assert_eq!(req.current_game_health, GameHealth::Healthy);
            assert_eq!(req.current_players[0].player_id, "p1");
            assert!(req.session_config.is_none());
        }
    }

    #[test]
    fn test_legacy_conversion() {
        let legacy: LegacyHeartbeatRequest =
            serde_json::from_str(r#"{"State": "Active", "Health": "Unhealthy", "Players": ["a", "b"]}"#)
                .unwrap();
        let req = HeartbeatRequest::from(legacy);
        assert_eq!(req.current_game_state, SessionHostStatus::Active);
        assert_eq!(req.current_game_health, GameHealth::Unhealthy);
        assert_eq!(req.current_players.len(), 2);
        assert_eq!(req.current_players[1].player_id, "b");
        assert!(req.assignment_id.is_none());
    }

    #[test]
    fn test_response_uses_camel_case() {
        let response = HeartbeatResponse {
            current_game_state: SessionHostStatus::StandingBy,
            next_heartbeat_interval_ms: 1000,
            operation: Operation::Active,
            session_config: Some(SessionConfig {
                session_id: Some("s1".into()),
                ..Default::default()
            }),
            maintenance_schedule: None,
            next_scheduled_maintenance_utc: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["operation"], "Active");
        assert_eq!(json["nextHeartbeatIntervalMs"], 1000);
        assert_eq!(json["sessionConfig"]["sessionId"], "s1");
        assert!(json.get("maintenanceSchedule").is_none());
    }

    #[test]
    fn test_maintenance_schedule_next_time() {
        let json = r#"{
            "DocumentIncarnation": "3",
            "MaintenanceEvents": [
                {"EventId": "e1", "EventType": "Reboot", "NotBefore": "2030-01-02T00:00:00Z", "DurationInSeconds": 60},
                {"EventId": "e2", "EventType": "Freeze", "NotBefore": "2030-01-01T00:00:00Z", "DurationInSeconds": 5}
            ]
        }"#;
        let schedule: MaintenanceSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.maintenance_events.len(), 2);
        assert_eq!(
            schedule.next_maintenance_utc().unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
        assert!(MaintenanceSchedule::default().next_maintenance_utc().is_none());
    }

    #[test]
    fn test_terminate_response() {
        let response = HeartbeatResponse::terminate();
        assert_eq!(response.operation, Operation::Terminate);
        assert!(response.session_config.is_none());
    }
}
