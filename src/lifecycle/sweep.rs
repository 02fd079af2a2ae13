//! Periodic sweep: state-duration enforcement, exit detection, restart-rate
//! detection and replacement of lost hosts.

use super::assignment::dispose_session_host;
use super::SessionHostsManager;
use crate::state::{SessionHostStatus, SessionHostType, VmState};
use crate::util::{elapsed_between, now_utc};
use chrono::{DateTime, Utc};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Hosts force-terminated for overstaying a state.
    pub expired: Vec<String>,
    /// Hosts removed after exiting or reporting `Terminated`.
    pub exited: Vec<String>,
    /// Replacement hosts started.
    pub created: usize,
    /// The restart-rate detector tripped during this sweep.
    pub too_many_restarts: bool,
}

impl SessionHostsManager {
    /// Run one full sweep.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(now_utc()).await
    }

    /// [`Self::sweep`] as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = self.evaluate_session_host_state_duration_at(now).await;
        let exited = self.remove_exited_session_hosts().await;
        let too_many_restarts = self.record_restarts(exited.len(), now);
        let created = self.replenish().await;

        if let Err(e) = self.save_if_dirty_async().await {
            tracing::warn!(error = %e, "failed to persist state after sweep");
        }
        SweepReport {
            expired,
            exited,
            created,
            too_many_restarts,
        }
    }

    /// Force-terminate every host that overstayed its current status.
    pub async fn evaluate_session_host_state_duration(&self) -> Vec<String> {
        self.evaluate_session_host_state_duration_at(now_utc()).await
    }

    /// [`Self::evaluate_session_host_state_duration`] as of `now`.
    pub async fn evaluate_session_host_state_duration_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let duration_override = self
            .vm
            .read()
            .game_resource_details
            .as_ref()
            .and_then(|d| d.session_host_max_state_duration_secs);
        let limits = &self.ctx.settings.state_limits;

        let expired: Vec<String> = self
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let host = entry.lock();
                let limit = limits.limit_for(host.current_status, duration_override)?;
                let elapsed = elapsed_between(host.last_state_transition_time, now);
                if elapsed <= limit {
                    return None;
                }
                tracing::warn!(
                    session_host_id = %host.unique_id,
                    status = %host.current_status,
                    elapsed_secs = elapsed.as_secs(),
                    limit_secs = limit.as_secs(),
                    "session host exceeded max state duration, terminating"
                );
                Some(host.unique_id.clone())
            })
            .collect();

        for id in &expired {
            self.remove_session_host(id, true).await;
        }
        expired
    }

    /// Remove hosts that reported `Terminated` or whose process or
    /// container is gone.
    async fn remove_exited_session_hosts(&self) -> Vec<String> {
        let mut exited = Vec::new();
        let mut to_check: Vec<(String, SessionHostType, String)> = Vec::new();

        for entry in self.entries() {
            let host = entry.lock();
            if host.current_status == SessionHostStatus::Terminated {
                exited.push(host.unique_id.clone());
            } else if host.is_created() {
                to_check.push((
                    host.unique_id.clone(),
                    host.host_type,
                    host.type_specific_id.clone(),
                ));
            }
        }

        if !to_check.is_empty() {
            let ctx = self.ctx.clone();
            let dead = tokio::task::spawn_blocking(move || {
                to_check
                    .into_iter()
                    .filter(|(_, host_type, type_specific_id)| {
                        !ctx.runners.for_type(*host_type).is_alive(type_specific_id)
                    })
                    .map(|(id, _, _)| id)
                    .collect::<Vec<_>>()
            })
            .await;
            match dead {
                Ok(dead) => exited.extend(dead),
                Err(e) => tracing::warn!(error = %e, "liveness check failed"),
            }
        }

        for id in &exited {
            tracing::info!(session_host_id = %id, "session host exited, removing");
            self.remove_session_host(id, true).await;
        }
        exited
    }

    /// Remove a host from the map, then stop, collect logs and delete it.
    ///
    /// Returns false if the host was not in the map.
    pub async fn remove_session_host(&self, session_host_id: &str, stop: bool) -> bool {
        let Some(entry) = self.hosts.write().remove(session_host_id) else {
            return false;
        };
        self.mark_dirty();

        let host = entry.lock().clone();
        let ctx = self.ctx.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || dispose_session_host(&ctx, &host, stop)).await
        {
            tracing::warn!(session_host_id = %session_host_id, error = %e, "failed to dispose session host");
        }
        true
    }

    /// Record `exits` host exits at `now` and trip the restart-rate detector
    /// when the window overflows. Returns true when it tripped.
    fn record_restarts(&self, exits: usize, now: DateTime<Utc>) -> bool {
        let settings = &self.ctx.settings;
        let window = chrono::Duration::from_std(settings.restart_window())
            .unwrap_or_else(|_| chrono::Duration::zero());

        let tripped = {
            let mut vm = self.vm.write();
            let before = vm.restart_history.len();
            vm.restart_history.extend(std::iter::repeat(now).take(exits));
            vm.restart_history.retain(|t| now - *t <= window);
            if vm.restart_history.len() != before {
                self.mark_dirty();
            }

            let restarts = vm.restart_history.len();
            if exits > 0
                && restarts > settings.max_restarts_in_window as usize
                && vm.vm_state.accepts_new_session_hosts()
            {
                let from = std::mem::replace(&mut vm.vm_state, VmState::TooManyServerRestarts);
                Some((from, restarts))
            } else {
                None
            }
        };

        match tripped {
            Some((from, restarts)) => {
                tracing::error!(
                    from = %from,
                    to = %VmState::TooManyServerRestarts,
                    restarts = restarts,
                    window_secs = settings.restart_window_secs,
                    "session hosts restarting too often"
                );
                self.mark_dirty();
                true
            }
            None => false,
        }
    }

    /// Top up the live hosts to the assignment's count. Returns how many
    /// were started.
    pub async fn replenish(&self) -> usize {
        let (vm_state, details, gate_open, in_maintenance) = {
            let vm = self.vm.read();
            (
                vm.vm_state,
                vm.game_resource_details.clone(),
                vm.is_startup_script_execution_complete,
                vm.maintenance_schedule.is_some(),
            )
        };
        if !vm_state.accepts_new_session_hosts() || !gate_open {
            return 0;
        }
        let Some(details) = details else {
            return 0;
        };
        if in_maintenance && self.ctx.settings.suppress_creation_during_maintenance {
            tracing::debug!("maintenance scheduled, not creating session hosts");
            return 0;
        }

        // Assignment work in flight creates its own hosts.
        let Ok(_work) = self.assignment_work.try_lock() else {
            return 0;
        };
        let wanted = (details.count as usize).saturating_sub(self.session_host_count());
        if wanted == 0 {
            return 0;
        }

        tracing::info!(wanted = wanted, "replacing session hosts");
        let created = self.start_session_hosts(&details, wanted).await;
        if created == 0 && self.session_host_count() == 0 {
            tracing::error!(assignment_id = %details.assignment_id, "no session host could be started");
            let _ = self.transition_vm(
                &[VmState::ProppingCompleted, VmState::Running],
                VmState::StartServersFailed,
            );
        }
        created
    }
}
