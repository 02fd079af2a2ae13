//! Session host lifecycle manager.
//!
//! [`SessionHostsManager`] owns the session host map and the VM-level state.
//! It drives assignment ([`assignment`]), heartbeats and goal states
//! ([`heartbeat`]) and the periodic sweep ([`sweep`]), and persists
//! everything through a [`StateStore`].
//!
//! # Locking
//!
//! The host map is `RwLock<HashMap<String, Arc<Mutex<SessionHostInfo>>>>`.
//! The map lock is held only long enough to clone an entry handle, or to
//! confirm an entry is still mapped while recording its backing id; per-host
//! work holds only the entry mutex. VM-level fields live behind their own
//! lock. An entry mutex is never acquired while the VM lock is held, and no
//! lock is ever held across an `.await`.
//!
//! # Persistence
//!
//! Every save snapshots under one mutex and stamps the snapshot with a
//! generation. The write skips any snapshot older than the one already on
//! disk, so concurrent savers never leave stale state behind.

mod assignment;
mod heartbeat;
mod sweep;

pub use assignment::AssignOutcome;
pub use heartbeat::heartbeat_directive;
pub use sweep::SweepReport;

use crate::config::{AgentSettings, VmConfiguration};
use crate::error::{Error, Result};
use crate::resources::{AssetRetriever, CertificateInstaller};
use crate::runner::Runners;
use crate::state::{
    AssignmentData, LoadOutcome, SessionHostInfo, SessionHostsStartInfo, StateStore,
    VmPersistedState, VmState,
};
use crate::system::SystemOperations;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vmagent_protocol::MaintenanceSchedule;

/// Handle to one session host record.
pub type HostEntry = Arc<Mutex<SessionHostInfo>>;

/// Everything the manager needs from the outside world.
///
/// Built once in `main` and shared; there is no global state.
pub struct AgentContext {
    /// Tunables.
    pub settings: AgentSettings,
    /// VM facts and folder layout.
    pub vm: VmConfiguration,
    /// Filesystem, archive and shell primitives.
    pub system: Arc<dyn SystemOperations>,
    /// One runner per session host type.
    pub runners: Runners,
    /// Asset downloads.
    pub assets: Arc<dyn AssetRetriever>,
    /// Certificate installation.
    pub certificates: Arc<dyn CertificateInstaller>,
}

/// Owns the session host map and the VM state.
pub struct SessionHostsManager {
    ctx: Arc<AgentContext>,
    hosts: RwLock<HashMap<String, HostEntry>>,
    /// VM-level fields. `session_hosts_map` is always empty here; hosts live
    /// in `hosts` and are merged back in by [`Self::snapshot`].
    vm: RwLock<VmPersistedState>,
    store: StateStore,
    dirty: AtomicBool,
    /// Generation of the last snapshot taken.
    snapshot_generation: Mutex<u64>,
    /// Generation of the snapshot on disk.
    written_generation: Arc<Mutex<u64>>,
    /// Serializes assignment and teardown work.
    assignment_work: tokio::sync::Mutex<()>,
}

impl SessionHostsManager {
    /// Manager over an already loaded state.
    pub fn new(ctx: Arc<AgentContext>, store: StateStore, mut state: VmPersistedState) -> Self {
        let hosts = std::mem::take(&mut state.session_hosts_map)
            .into_iter()
            .map(|(id, host)| (id, Arc::new(Mutex::new(host))))
            .collect();
        Self {
            ctx,
            hosts: RwLock::new(hosts),
            vm: RwLock::new(state),
            store,
            dirty: AtomicBool::new(false),
            snapshot_generation: Mutex::new(0),
            written_generation: Arc::new(Mutex::new(0)),
            assignment_work: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the persisted state, reconcile it with the live hosts and save
    /// the result.
    ///
    /// Blocking: checks every recorded host through its runner.
    pub fn restore(ctx: Arc<AgentContext>) -> Result<Self> {
        let store = StateStore::new(ctx.vm.directories.state_file());
        let state = match store.load_or_recover() {
            LoadOutcome::Restored(state) => {
                tracing::info!(
                    path = %store.path().display(),
                    vm_state = %state.vm_state,
                    session_hosts = state.session_hosts_map.len(),
                    "restored persisted state"
                );
                state
            }
            LoadOutcome::Fresh(state) => {
                tracing::info!(path = %store.path().display(), "no persisted state, starting unassigned");
                state
            }
            LoadOutcome::Recovered {
                state,
                quarantined_to,
                reason,
            } => {
                tracing::error!(
                    path = %store.path().display(),
                    moved_to = %quarantined_to.display(),
                    reason = %reason,
                    "persisted state unusable, starting unassigned"
                );
                state
            }
        };

        let manager = Self::new(ctx, store, state);
        let dropped = manager.reconcile();
        if dropped > 0 {
            tracing::warn!(dropped = dropped, "dropped session hosts with no live backing");
        }
        manager.save()?;
        Ok(manager)
    }

    /// Drop hosts whose process or container is gone. Returns how many were
    /// dropped; their instance slots become free.
    pub fn reconcile(&self) -> usize {
        let entries: Vec<(String, HostEntry)> = self
            .hosts
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let mut dropped = 0;
        for (id, entry) in entries {
            let (host_type, type_specific_id) = {
                let host = entry.lock();
                (host.host_type, host.type_specific_id.clone())
            };
            let alive = !type_specific_id.is_empty()
                && self.ctx.runners.for_type(host_type).is_alive(&type_specific_id);
            if !alive {
                tracing::info!(session_host_id = %id, "session host not running, dropping");
                self.hosts.write().remove(&id);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.mark_dirty();
        }
        dropped
    }

    /// Pick up work a previous run left half done.
    pub fn resume(self: &Arc<Self>) {
        match self.vm_state() {
            VmState::Assigned | VmState::Propping => {
                tracing::info!("resuming interrupted assignment");
                self.spawn_assignment();
            }
            VmState::PendingResourceCleanup => {
                tracing::info!("resuming interrupted unassignment");
                self.spawn_teardown();
            }
            _ => {}
        }
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Current VM state.
    pub fn vm_state(&self) -> VmState {
        self.vm.read().vm_state
    }

    /// Current assignment payload.
    pub fn game_resource_details(&self) -> Option<SessionHostsStartInfo> {
        self.vm.read().game_resource_details.clone()
    }

    /// Entry handle for a session host.
    pub fn session_host(&self, id: &str) -> Option<HostEntry> {
        self.hosts.read().get(id).cloned()
    }

    /// Number of session hosts in the map.
    pub fn session_host_count(&self) -> usize {
        self.hosts.read().len()
    }

    /// Copy of one session host record.
    pub fn session_host_info(&self, id: &str) -> Option<SessionHostInfo> {
        self.session_host(id).map(|entry| entry.lock().clone())
    }

    fn entries(&self) -> Vec<HostEntry> {
        self.hosts.read().values().cloned().collect()
    }

    /// Full persisted state, host map included.
    pub fn snapshot(&self) -> VmPersistedState {
        let hosts: HashMap<String, SessionHostInfo> = self
            .entries()
            .into_iter()
            .map(|entry| {
                let host = entry.lock().clone();
                (host.unique_id.clone(), host)
            })
            .collect();
        let mut state = self.vm.read().clone();
        state.session_hosts_map = hosts;
        state
    }

    /// Read-only view of the assignment.
    pub fn assignment_data(&self) -> AssignmentData {
        self.snapshot().assignment_data()
    }

    fn prepare_save(&self) -> PendingSave {
        // Clear first so a mutation racing with the save re-marks it.
        self.dirty.store(false, Ordering::SeqCst);
        let mut generation = self.snapshot_generation.lock();
        *generation += 1;
        PendingSave {
            generation: *generation,
            state: self.snapshot(),
            store: self.store.clone(),
            written: self.written_generation.clone(),
        }
    }

    fn finish_save(&self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.mark_dirty();
        }
        result
    }

    /// Persist the current state. Blocking.
    pub fn save(&self) -> Result<()> {
        let pending = self.prepare_save();
        self.finish_save(pending.write())
    }

    /// [`Self::save`] with the file write on the blocking pool.
    pub async fn save_async(&self) -> Result<()> {
        let pending = self.prepare_save();
        let result = tokio::task::spawn_blocking(move || pending.write())
            .await
            .map_err(|e| Error::persistence("save", e.to_string()))
            .and_then(|r| r);
        self.finish_save(result)
    }

    /// Persist only if something changed since the last save. Blocking.
    pub fn save_if_dirty(&self) -> Result<()> {
        if self.dirty.load(Ordering::SeqCst) {
            self.save()?;
        }
        Ok(())
    }

    /// [`Self::save_if_dirty`] with the file write on the blocking pool.
    pub async fn save_if_dirty_async(&self) -> Result<()> {
        if self.dirty.load(Ordering::SeqCst) {
            self.save_async().await?;
        }
        Ok(())
    }

    /// Save, logging instead of failing. Used after mutations that already
    /// took effect in memory.
    fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }

    /// Async [`Self::save_or_warn`].
    async fn persist_or_warn(&self) {
        if let Err(e) = self.save_async().await {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Move the VM to `to` only if it is currently in one of `from`.
    fn transition_vm(&self, from: &[VmState], to: VmState) -> Result<()> {
        let previous = {
            let mut vm = self.vm.write();
            if !from.contains(&vm.vm_state) {
                let expected = from
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|");
                return Err(Error::invalid_state(expected, vm.vm_state));
            }
            std::mem::replace(&mut vm.vm_state, to)
        };
        if previous != to {
            tracing::info!(from = %previous, to = %to, "vm state changed");
            self.mark_dirty();
        }
        Ok(())
    }

    /// Store the maintenance schedule and surface it on every heartbeat.
    pub fn mark_for_maintenance(&self, schedule: MaintenanceSchedule) {
        tracing::info!(
            document_incarnation = %schedule.document_incarnation,
            events = schedule.maintenance_events.len(),
            next = ?schedule.next_maintenance_utc(),
            "maintenance scheduled"
        );
        self.vm.write().maintenance_schedule = Some(schedule);
        self.mark_dirty();
        self.save_or_warn();
    }

    /// Whether a maintenance schedule is present.
    pub fn is_marked_for_maintenance(&self) -> bool {
        self.vm.read().maintenance_schedule.is_some()
    }
}

/// A snapshot waiting to be written.
struct PendingSave {
    generation: u64,
    state: VmPersistedState,
    store: StateStore,
    written: Arc<Mutex<u64>>,
}

impl PendingSave {
    /// Write the snapshot unless a newer one already reached the disk.
    fn write(self) -> Result<()> {
        let mut written = self.written.lock();
        if self.generation < *written {
            tracing::trace!(generation = self.generation, "skipping superseded snapshot");
            return Ok(());
        }
        self.store.save(&self.state)?;
        *written = self.generation;
        tracing::trace!(
            vm_state = %self.state.vm_state,
            generation = self.generation,
            "persisted state saved"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SessionHostsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHostsManager")
            .field("vm_state", &self.vm_state())
            .field("session_hosts", &self.session_host_count())
            .finish_non_exhaustive()
    }
}
