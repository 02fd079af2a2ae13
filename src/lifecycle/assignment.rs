//! Assignment, resource retrieval, session host creation and teardown.

use super::{AgentContext, SessionHostsManager};
use crate::config::VmDirectories;
use crate::error::{Error, Result};
use crate::retry::retry_fixed_window;
use crate::session_config::SessionHostConfiguration;
use crate::state::{
    AssetDetail, ResourceRetrievalResult, SessionHostInfo, SessionHostType, SessionHostsStartInfo,
    VmCondition, VmPersistedState, VmState,
};
use crate::util::{new_id, now_utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Condition recorded when the VM startup script fails.
const STARTUP_SCRIPT_CONDITION: &str = "StartupScriptFailed";

/// Result of an assign request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The VM took the assignment; propping starts.
    Accepted,
    /// The VM already holds this assignment.
    AlreadyAssigned,
}

/// Outcome of retrieving everything an assignment needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PropResults {
    asset: ResourceRetrievalResult,
    image: ResourceRetrievalResult,
    certificate: ResourceRetrievalResult,
    startup_script_error: Option<String>,
}

impl PropResults {
    /// First failure that prevents any session host from starting.
    fn blocking_failure(&self) -> Option<&'static str> {
        if self.asset.is_failure() {
            Some("asset")
        } else if self.image.is_failure() {
            Some("image")
        } else if self.certificate.is_failure() {
            Some("certificate")
        } else if self.startup_script_error.is_some() {
            Some("startup script")
        } else {
            None
        }
    }
}

fn outcome_of(resource: &str, result: Result<()>) -> ResourceRetrievalResult {
    match result {
        Ok(()) => ResourceRetrievalResult::Success,
        Err(e) => {
            tracing::error!(resource = %resource, error = %e, "resource retrieval failed");
            e.retrieval_outcome()
        }
    }
}

/// Where asset `index` is downloaded to.
fn asset_archive_path(dirs: &VmDirectories, index: usize, asset: &AssetDetail) -> PathBuf {
    dirs.downloads().join(format!("{}_{}", index, asset.file_name()))
}

fn retrieve_assets(ctx: &AgentContext, details: &SessionHostsStartInfo) -> Result<()> {
    let dirs = &ctx.vm.directories;
    let retain = ctx.settings.retain_assets_on_reassignment;

    for (index, asset) in details.asset_details.iter().enumerate() {
        let archive = asset_archive_path(dirs, index, asset);
        match details.session_host_type {
            SessionHostType::Container => {
                let target = dirs.asset(index);
                if retain && ctx.system.dir_exists(&target) {
                    tracing::debug!(asset = index, "asset already extracted, skipping");
                    continue;
                }
                ctx.assets.download(asset, &archive)?;
                ctx.system.delete_dir(&target)?;
                ctx.system.extract_archive(&archive, &target).map_err(|e| {
                    Error::retrieval("asset", ResourceRetrievalResult::Other, e.to_string())
                })?;
            }
            // Processes extract a private copy per instance at creation.
            SessionHostType::Process => {
                if retain && ctx.system.file_exists(&archive) {
                    tracing::debug!(asset = index, "asset already downloaded, skipping");
                    continue;
                }
                ctx.assets.download(asset, &archive)?;
            }
        }
        tracing::info!(asset = index, mount_path = %asset.mount_path, "asset retrieved");
    }
    Ok(())
}

fn retrieve_image(ctx: &AgentContext, details: &SessionHostsStartInfo) -> Result<()> {
    let runner = ctx.runners.for_type(details.session_host_type);
    retry_fixed_window(
        &ctx.settings.image_pull,
        "pull image",
        || runner.retrieve_resources(details),
        |e| {
            matches!(
                e,
                Error::Retrieval {
                    outcome: ResourceRetrievalResult::ResourceNotAvailable
                        | ResourceRetrievalResult::TooManyRequests
                        | ResourceRetrievalResult::Other,
                    ..
                }
            )
        },
    )
}

/// Retrieve assets, image and certificates and run the startup script.
///
/// Blocking. Each resource is attempted even if an earlier one failed so
/// every result is recorded.
fn retrieve_all(
    ctx: &AgentContext,
    details: &SessionHostsStartInfo,
    run_startup_script: bool,
) -> PropResults {
    let dirs = &ctx.vm.directories;

    let asset = if details.asset_details.is_empty() {
        ResourceRetrievalResult::Success
    } else {
        outcome_of("asset", retrieve_assets(ctx, details))
    };

    let image = match details.session_host_type {
        SessionHostType::Container => outcome_of("image", retrieve_image(ctx, details)),
        SessionHostType::Process => ResourceRetrievalResult::Unknown,
    };

    let certificate = if details.game_certificates.is_empty() {
        ResourceRetrievalResult::Success
    } else {
        outcome_of(
            "certificate",
            ctx.certificates
                .install(&details.game_certificates, &dirs.certificates()),
        )
    };

    if let Err(e) = ctx.system.create_dir(&dirs.shared_content()) {
        tracing::warn!(error = %e, "failed to create shared content folder");
    }

    let startup_script_error = match details.vm_startup_script.as_deref() {
        Some(script) if run_startup_script && !script.trim().is_empty() => {
            match ctx.system.run_shell(script, &dirs.root) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "vm startup script failed");
                    Some(e.to_string())
                }
            }
        }
        _ => None,
    };

    PropResults {
        asset,
        image,
        certificate,
        startup_script_error,
    }
}

/// Prepare folders and config for one host and start it. Blocking.
fn launch_session_host(
    ctx: &AgentContext,
    details: &SessionHostsStartInfo,
    unique_id: &str,
    instance_number: u32,
    log_folder_id: &str,
) -> Result<String> {
    let dirs = &ctx.vm.directories;
    let config = SessionHostConfiguration::new(&ctx.vm, &ctx.settings, details);
    ctx.system.create_dir(&dirs.instance(instance_number))?;

    if details.session_host_type == SessionHostType::Process {
        let retain = ctx.settings.retain_assets_on_reassignment;
        for (index, asset) in details.asset_details.iter().enumerate() {
            let target = config.process_asset_dir(instance_number, asset);
            if retain && ctx.system.dir_exists(&target) {
                continue;
            }
            ctx.system.delete_dir(&target)?;
            ctx.system
                .extract_archive(&asset_archive_path(dirs, index, asset), &target)?;
        }
    }

    let launch = config.prepare_launch(ctx.system.as_ref(), unique_id, instance_number, log_folder_id)?;
    ctx.runners
        .for_type(details.session_host_type)
        .create_and_start(&launch)
}

/// Stop, collect logs and delete one host. Best-effort; blocking.
pub(super) fn dispose_session_host(ctx: &AgentContext, host: &SessionHostInfo, stop: bool) {
    if !host.is_created() {
        return;
    }
    let runner = ctx.runners.for_type(host.host_type);
    let id = host.type_specific_id.as_str();

    if stop {
        if let Err(e) = runner.stop(id) {
            tracing::warn!(session_host_id = %host.unique_id, error = %e, "failed to stop session host");
        }
    }
    if let Err(e) = runner.collect_logs(id, &ctx.vm.directories.logs(&host.log_folder_id)) {
        tracing::debug!(session_host_id = %host.unique_id, error = %e, "failed to collect logs");
    }
    if let Err(e) = runner.delete(id) {
        tracing::warn!(session_host_id = %host.unique_id, error = %e, "failed to delete session host");
    }
}

/// Release everything an assignment put on the VM. Best-effort; blocking.
fn release_resources(ctx: &AgentContext, details: Option<&SessionHostsStartInfo>) {
    let dirs = &ctx.vm.directories;
    let retain = ctx.settings.retain_assets_on_reassignment;

    if let Some(details) = details {
        if !retain {
            let runner = ctx.runners.for_type(details.session_host_type);
            if let Err(e) = runner.delete_resources(details) {
                tracing::warn!(error = %e, "failed to delete runner resources");
            }
        }
    }

    let mut folders = vec![dirs.certificates(), dirs.shared_content()];
    if !retain {
        folders.extend([dirs.instances_root(), dirs.assets_root(), dirs.downloads()]);
    }
    for folder in folders {
        if let Err(e) = ctx.system.delete_dir(&folder) {
            tracing::warn!(folder = %folder.display(), error = %e, "failed to delete folder");
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::runner("spawn blocking", e.to_string())
}

impl SessionHostsManager {
    /// Bind an assignment to the VM.
    ///
    /// Idempotent for the assignment already held; a different assignment
    /// is a conflict until the VM is unassigned.
    pub fn assign(&self, start_info: SessionHostsStartInfo) -> Result<AssignOutcome> {
        let assignment_id = start_info.assignment_id.clone();
        let outcome = {
            let mut vm = self.vm.write();
            match vm.vm_state {
                VmState::Unknown | VmState::Unassigned => {
                    let mut fresh = VmPersistedState::unassigned();
                    fresh.maintenance_schedule = vm.maintenance_schedule.take();
                    fresh.vm_conditions = std::mem::take(&mut vm.vm_conditions);
                    fresh.vm_state = VmState::Assigned;
                    fresh.game_resource_details = Some(start_info);
                    fresh.assignment_time = Some(now_utc());
                    *vm = fresh;
                    AssignOutcome::Accepted
                }
                state => match vm.game_resource_details.as_ref() {
                    Some(current) if current.assignment_id == assignment_id => {
                        AssignOutcome::AlreadyAssigned
                    }
                    Some(current) => {
                        return Err(Error::AssignmentConflict {
                            current: current.assignment_id.clone(),
                            requested: assignment_id,
                        })
                    }
                    None => return Err(Error::invalid_state("Unassigned", state)),
                },
            }
        };

        if outcome == AssignOutcome::Accepted {
            tracing::info!(assignment_id = %assignment_id, "vm state changed to Assigned");
            self.mark_dirty();
            self.save_or_warn();
        } else {
            tracing::debug!(assignment_id = %assignment_id, "assignment already held");
        }
        Ok(outcome)
    }

    /// [`Self::assign`], then start propping in the background.
    ///
    /// Blocking: persists the state. Must run inside a tokio runtime.
    pub fn assign_and_start(
        self: &Arc<Self>,
        start_info: SessionHostsStartInfo,
    ) -> Result<AssignOutcome> {
        let outcome = self.assign(start_info)?;
        if outcome == AssignOutcome::Accepted {
            self.spawn_assignment();
        }
        Ok(outcome)
    }

    pub(super) fn spawn_assignment(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run_assignment().await {
                tracing::error!(error = %e, "assignment failed");
            }
        });
    }

    /// Retrieve resources and create the initial session hosts.
    pub async fn run_assignment(&self) -> Result<()> {
        let _work = self.assignment_work.lock().await;

        let details = self
            .game_resource_details()
            .ok_or_else(|| Error::invalid_state("Assigned", self.vm_state()))?;
        self.transition_vm(&[VmState::Assigned, VmState::Propping], VmState::Propping)?;
        self.persist_or_warn().await;

        let run_startup_script = !self.vm.read().is_startup_script_execution_complete;
        let ctx = self.ctx.clone();
        let prop_details = details.clone();
        let results = tokio::task::spawn_blocking(move || {
            retrieve_all(&ctx, &prop_details, run_startup_script)
        })
        .await
        .map_err(join_error)?;

        {
            let mut vm = self.vm.write();
            vm.asset_retrieval_result = results.asset;
            vm.image_retrieval_result = results.image;
            vm.certificate_retrieval_result = results.certificate;
            match &results.startup_script_error {
                Some(reason) => {
                    vm.vm_conditions.insert(
                        STARTUP_SCRIPT_CONDITION.to_string(),
                        VmCondition {
                            condition: "True".to_string(),
                            when_utc: now_utc(),
                            reason: reason.clone(),
                        },
                    );
                }
                None => vm.is_startup_script_execution_complete = true,
            }
        }
        self.mark_dirty();

        if let Some(resource) = results.blocking_failure() {
            tracing::error!(
                assignment_id = %details.assignment_id,
                resource = %resource,
                "propping failed"
            );
            // An unassignment may have raced us; then the state stays.
            let _ = self.transition_vm(&[VmState::Propping], VmState::ProppingFailed);
            self.persist_or_warn().await;
            return Ok(());
        }

        if self
            .transition_vm(&[VmState::Propping], VmState::ProppingCompleted)
            .is_err()
        {
            self.persist_or_warn().await;
            return Ok(());
        }
        self.persist_or_warn().await;

        let wanted = details.count as usize;
        let created = self.start_session_hosts(&details, wanted).await;
        if created == 0 && wanted > 0 {
            tracing::error!(assignment_id = %details.assignment_id, "no session host could be started");
            let _ = self.transition_vm(
                &[VmState::ProppingCompleted, VmState::Running],
                VmState::StartServersFailed,
            );
        }
        self.persist_or_warn().await;
        Ok(())
    }

    /// Instance slots below `count` not held by any host.
    fn free_instance_slots(&self, count: u32) -> Vec<u32> {
        let used: HashSet<u32> = self
            .entries()
            .into_iter()
            .map(|entry| entry.lock().instance_number)
            .collect();
        (0..count).filter(|slot| !used.contains(slot)).collect()
    }

    /// Create up to `wanted` hosts in free slots. Returns how many started.
    ///
    /// Callers hold `assignment_work` so two creators never pick the same
    /// slot.
    pub(super) async fn start_session_hosts(&self, details: &SessionHostsStartInfo, wanted: usize) -> usize {
        let mut created = 0;
        for instance_number in self.free_instance_slots(details.count).into_iter().take(wanted) {
            if !self.vm_state().accepts_new_session_hosts() {
                break;
            }
            if self.create_session_host(details, instance_number).await.is_ok() {
                created += 1;
            }
        }
        created
    }

    /// Create one session host in `instance_number`.
    ///
    /// The host is in the map as `PendingHeartbeat` while the runner works;
    /// on failure it is removed again and the slot freed.
    pub async fn create_session_host(
        &self,
        details: &SessionHostsStartInfo,
        instance_number: u32,
    ) -> Result<String> {
        let unique_id = new_id();
        let log_folder_id = new_id();
        let host = SessionHostInfo::new_pending(
            unique_id.clone(),
            details.assignment_id.clone(),
            instance_number,
            details.session_host_type,
            log_folder_id.clone(),
            now_utc(),
        );
        let entry = Arc::new(Mutex::new(host));
        self.hosts.write().insert(unique_id.clone(), entry.clone());
        self.mark_dirty();

        let ctx = self.ctx.clone();
        let launch_details = details.clone();
        let launch_id = unique_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            launch_session_host(&ctx, &launch_details, &launch_id, instance_number, &log_folder_id)
        })
        .await
        .map_err(join_error)
        .and_then(|r| r);

        match result {
            Ok(type_specific_id) => {
                // The sweep or a teardown may have dropped the placeholder
                // while the runner worked; then nobody else will stop it.
                let tracked = {
                    let hosts = self.hosts.read();
                    match hosts.get(&unique_id) {
                        Some(current) if Arc::ptr_eq(current, &entry) => {
                            entry.lock().type_specific_id = type_specific_id.clone();
                            true
                        }
                        _ => false,
                    }
                };
                if !tracked {
                    tracing::warn!(
                        session_host_id = %unique_id,
                        type_specific_id = %type_specific_id,
                        "session host removed while starting, disposing"
                    );
                    let mut host = entry.lock().clone();
                    host.type_specific_id = type_specific_id;
                    let ctx = self.ctx.clone();
                    let disposed = tokio::task::spawn_blocking(move || {
                        dispose_session_host(&ctx, &host, true);
                    })
                    .await;
                    if let Err(e) = disposed {
                        tracing::warn!(
                            session_host_id = %unique_id,
                            error = %e,
                            "failed to dispose session host"
                        );
                    }
                    return Err(Error::runner(
                        "create",
                        format!("session host {} was removed while starting", unique_id),
                    ));
                }

                tracing::info!(
                    session_host_id = %unique_id,
                    type_specific_id = %type_specific_id,
                    instance = instance_number,
                    "session host created"
                );
                self.persist_or_warn().await;
                Ok(unique_id)
            }
            Err(e) => {
                tracing::error!(
                    session_host_id = %unique_id,
                    instance = instance_number,
                    error = %e,
                    "failed to create session host"
                );
                self.hosts.write().remove(&unique_id);
                self.mark_dirty();
                Err(e)
            }
        }
    }

    /// Mark the VM for teardown.
    ///
    /// Returns true when teardown should start, false when it was already
    /// requested.
    pub fn set_pending_unassignment(&self, assignment_id: &str) -> Result<bool> {
        let previous = {
            let mut vm = self.vm.write();
            match vm.game_resource_details.as_ref() {
                None => return Err(Error::invalid_state("assigned", vm.vm_state)),
                Some(current) if current.assignment_id != assignment_id => {
                    return Err(Error::AssignmentConflict {
                        current: current.assignment_id.clone(),
                        requested: assignment_id.to_string(),
                    })
                }
                Some(_) => {}
            }
            if vm.vm_state.is_unassigning() {
                return Ok(false);
            }
            std::mem::replace(&mut vm.vm_state, VmState::PendingResourceCleanup)
        };

        tracing::info!(
            assignment_id = %assignment_id,
            from = %previous,
            to = %VmState::PendingResourceCleanup,
            "vm state changed"
        );
        self.mark_dirty();
        self.save_or_warn();
        Ok(true)
    }

    /// [`Self::set_pending_unassignment`], then tear down in the background.
    ///
    /// Returns the VM state as left by the request, before teardown runs.
    /// Blocking: persists the state.
    pub fn unassign(self: &Arc<Self>, assignment_id: &str) -> Result<VmState> {
        let started = self.set_pending_unassignment(assignment_id)?;
        let vm_state = self.vm_state();
        if started {
            self.spawn_teardown();
        }
        Ok(vm_state)
    }

    pub(super) fn spawn_teardown(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.teardown().await {
                tracing::error!(error = %e, "teardown failed");
            }
        });
    }

    /// Delete every host and release the assignment's resources.
    pub async fn teardown(&self) -> Result<()> {
        let _work = self.assignment_work.lock().await;
        if self.vm_state() != VmState::PendingResourceCleanup {
            return Ok(());
        }

        let hosts: Vec<SessionHostInfo> = {
            let drained: Vec<_> = self.hosts.write().drain().map(|(_, entry)| entry).collect();
            drained.into_iter().map(|entry| entry.lock().clone()).collect()
        };
        self.mark_dirty();
        tracing::info!(session_hosts = hosts.len(), "tearing down assignment");

        let details = self.game_resource_details();
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || {
            for host in &hosts {
                dispose_session_host(&ctx, host, true);
            }
            release_resources(&ctx, details.as_ref());
        })
        .await
        .map_err(join_error)?;

        self.transition_vm(&[VmState::PendingResourceCleanup], VmState::ServersRemoved)?;
        self.save_async().await
    }

    /// Return a torn down VM to `Unassigned`, clearing the assignment.
    pub fn complete_unassignment(&self) -> Result<()> {
        {
            let mut vm = self.vm.write();
            if vm.vm_state != VmState::ServersRemoved {
                return Err(Error::invalid_state("ServersRemoved", vm.vm_state));
            }
            let mut fresh = VmPersistedState::unassigned();
            fresh.maintenance_schedule = vm.maintenance_schedule.take();
            fresh.vm_conditions = std::mem::take(&mut vm.vm_conditions);
            *vm = fresh;
        }
        tracing::info!(from = %VmState::ServersRemoved, to = %VmState::Unassigned, "vm state changed");
        self.mark_dirty();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_failure_order() {
        let ok = PropResults {
            asset: ResourceRetrievalResult::Success,
            image: ResourceRetrievalResult::Unknown,
            certificate: ResourceRetrievalResult::Success,
            startup_script_error: None,
        };
        assert_eq!(ok.blocking_failure(), None);

        let cases = [
            (
                PropResults {
                    asset: ResourceRetrievalResult::ResourceNotFound,
                    image: ResourceRetrievalResult::AuthenticationFailure,
                    ..ok.clone()
                },
                Some("asset"),
            ),
            (
                PropResults {
                    image: ResourceRetrievalResult::TooManyRequests,
                    ..ok.clone()
                },
                Some("image"),
            ),
            (
                PropResults {
                    certificate: ResourceRetrievalResult::Other,
                    ..ok.clone()
                },
                Some("certificate"),
            ),
            (
                PropResults {
                    startup_script_error: Some("exit 1".into()),
                    ..ok.clone()
                },
                Some("startup script"),
            ),
        ];
        for (results, expected) in cases {
            assert_eq!(results.blocking_failure(), expected);
        }
    }

    #[test]
    fn test_asset_archive_path() {
        let dirs = VmDirectories::new("/agent");
        let asset = AssetDetail {
            mount_path: "/data".into(),
            download_uri: "https://acct.blob.core.windows.net/c/game.zip".into(),
            sas_token: Some("sig=x".into()),
        };
        assert_eq!(
            asset_archive_path(&dirs, 2, &asset),
            PathBuf::from("/agent/downloads/2_game.zip")
        );
    }
}
