//! Heartbeat processing and goal-state negotiation.

use super::SessionHostsManager;
use crate::error::{Error, Result};
use crate::state::{is_live_status, is_valid_transition, GoalState, SessionHostInfo, VmState};
use crate::util::{elapsed_between, now_utc};
use chrono::{DateTime, Utc};
use std::time::Duration;
use vmagent_protocol::{
    HeartbeatRequest, HeartbeatResponse, MaintenanceSchedule, Operation, SessionConfig,
    SessionHostStatus,
};

/// VM-level facts captured once per heartbeat, before the entry is locked.
struct VmView {
    vm_state: VmState,
    maintenance_schedule: Option<MaintenanceSchedule>,
    duration_override: Option<u64>,
}

/// Decide the directive for a host that just heartbeated.
///
/// Consumes an `Active` goal state once it is delivered (or once the host
/// already reports `Active`). `limit` is the host's maximum time in its
/// current status.
pub fn heartbeat_directive(
    host: &mut SessionHostInfo,
    vm_state: VmState,
    limit: Option<Duration>,
    now: DateTime<Utc>,
) -> (Operation, Option<SessionConfig>) {
    if vm_state.is_unassigning() || vm_state == VmState::TooManyServerRestarts {
        return (Operation::Terminate, None);
    }

    if let Some(limit) = limit {
        if elapsed_between(host.last_state_transition_time, now) > limit {
            return (Operation::Terminate, None);
        }
    }

    match host.goal_state.as_ref().map(|goal| goal.status) {
        Some(SessionHostStatus::Terminated) => (Operation::Terminate, None),
        Some(SessionHostStatus::Active) => match host.current_status {
            SessionHostStatus::StandingBy => {
                let goal = host.goal_state.take();
                let config = goal.and_then(|g| g.session_config);
                host.session_config = config.clone();
                (Operation::Active, config)
            }
            SessionHostStatus::Active => {
                host.goal_state = None;
                (Operation::Continue, None)
            }
            _ => (Operation::Continue, None),
        },
        _ => (Operation::Continue, None),
    }
}

impl SessionHostsManager {
    fn vm_view(&self) -> VmView {
        let vm = self.vm.read();
        VmView {
            vm_state: vm.vm_state,
            maintenance_schedule: vm.maintenance_schedule.clone(),
            duration_override: vm
                .game_resource_details
                .as_ref()
                .and_then(|d| d.session_host_max_state_duration_secs),
        }
    }

    /// Validate and apply a heartbeat.
    ///
    /// Returns `(false, terminate)` for an unknown host. An invalid
    /// transition is an error and leaves the stored record untouched.
    pub fn try_process_heartbeat(
        &self,
        session_host_id: &str,
        request: HeartbeatRequest,
    ) -> Result<(bool, HeartbeatResponse)> {
        let Some(entry) = self.session_host(session_host_id) else {
            tracing::debug!(session_host_id = %session_host_id, "heartbeat from unknown session host");
            return Ok((false, HeartbeatResponse::terminate()));
        };

        let view = self.vm_view();
        let now = now_utc();
        let limits = &self.ctx.settings.state_limits;

        let (response, status, changed) = {
            let mut host = entry.lock();
            let from = host.current_status;
            let to = request.current_game_state;

            if !is_valid_transition(from, to) {
                tracing::warn!(
                    session_host_id = %session_host_id,
                    from = %from,
                    to = %to,
                    "rejected invalid status transition"
                );
                return Err(Error::InvalidTransition {
                    session_host_id: session_host_id.to_string(),
                    from,
                    to,
                });
            }

            if let Some(assignment_id) = request.assignment_id.as_deref() {
                if assignment_id != host.assignment_id {
                    tracing::warn!(
                        session_host_id = %session_host_id,
                        reported = %assignment_id,
                        expected = %host.assignment_id,
                        "heartbeat reports a different assignment"
                    );
                }
            }

            let mut changed = host.apply_status(to, now);
            if changed {
                tracing::info!(session_host_id = %session_host_id, from = %from, to = %to, "session host status changed");
            }
            host.current_game_health = request.current_game_health;
            host.current_players = request.current_players;
            host.last_heartbeat_time = Some(now);
            if request.crash_dump_state.is_some() {
                host.crash_dump_state = request.crash_dump_state;
            }
            if let Some(profiling) = request.contains_profiling_output {
                host.contains_profiling_output = profiling;
            }
            if to == SessionHostStatus::Active && host.session_config.is_none() {
                host.session_config = request.session_config;
            }

            let had_goal = host.goal_state.is_some();
            let limit = limits.limit_for(host.current_status, view.duration_override);
            let (operation, session_config) = heartbeat_directive(&mut host, view.vm_state, limit, now);
            changed |= had_goal != host.goal_state.is_some();

            if operation == Operation::Terminate {
                tracing::debug!(session_host_id = %session_host_id, status = %host.current_status, "directing session host to terminate");
            }

            let response = HeartbeatResponse {
                current_game_state: host.current_status,
                next_heartbeat_interval_ms: self.ctx.settings.heartbeat_interval_ms,
                operation,
                session_config,
                next_scheduled_maintenance_utc: view
                    .maintenance_schedule
                    .as_ref()
                    .and_then(MaintenanceSchedule::next_maintenance_utc),
                maintenance_schedule: view.maintenance_schedule,
            };
            (response, host.current_status, changed)
        };

        if changed {
            self.mark_dirty();
        }
        if is_live_status(status) {
            self.promote_to_running();
        }
        Ok((true, response))
    }

    /// `ProppingCompleted -> Running` on the first live heartbeat.
    fn promote_to_running(&self) {
        if self.vm_state() == VmState::ProppingCompleted {
            // Lost races just fail the state check.
            let _ = self.transition_vm(&[VmState::ProppingCompleted], VmState::Running);
        }
    }

    /// Queue a goal state for a host.
    ///
    /// Returns false if the host is unknown or already has a pending goal.
    pub fn try_set_goal_state_info(&self, session_host_id: &str, goal: GoalState) -> bool {
        let Some(entry) = self.session_host(session_host_id) else {
            return false;
        };
        {
            let mut host = entry.lock();
            if host.goal_state.is_some() {
                tracing::debug!(session_host_id = %session_host_id, "goal state already pending");
                return false;
            }
            tracing::info!(session_host_id = %session_host_id, goal = %goal.status, "goal state set");
            host.goal_state = Some(goal);
        }
        self.mark_dirty();
        true
    }
}
