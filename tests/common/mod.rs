//! Shared fixtures for integration tests.
//!
//! [`FakeRunner`] stands in for the process and container backends: hosts
//! are entries in a set, "exiting" removes them.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use vmagent::config::{AgentSettings, VmConfiguration};
use vmagent::lifecycle::{AgentContext, SessionHostsManager};
use vmagent::resources::{AssetRetriever, CertificateInstaller};
use vmagent::runner::{LaunchSpec, Runners, SessionHostRunner};
use vmagent::state::{
    AssetDetail, CertificateDetail, ResourceRetrievalResult,
    SessionHostsStartInfo,
};
use vmagent::system::LocalSystemOperations;
use vmagent::{Error, Result};

/// In-memory session host backend.
#[derive(Default)]
pub struct FakeRunner {
    next_id: AtomicUsize,
    alive: Mutex<HashSet<String>>,
    launches: Mutex<Vec<LaunchSpec>>,
    stopped: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    pull_failure: Mutex<Option<ResourceRetrievalResult>>,
    create_gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following create fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make resource retrieval fail with `outcome`.
    pub fn fail_pulls(&self, outcome: ResourceRetrievalResult) {
        *self.pull_failure.lock() = Some(outcome);
    }

    /// Block the next create until the returned sender fires.
    pub fn hold_creates(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.create_gate.lock() = Some(rx);
        tx
    }

    /// Simulate the backing process or container exiting.
    pub fn exit(&self, type_specific_id: &str) {
        self.alive.lock().remove(type_specific_id);
    }

    /// Mark a type-specific id as running, as if it survived an agent restart.
    pub fn adopt(&self, type_specific_id: &str) {
        self.alive.lock().insert(type_specific_id.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.lock().len()
    }
}

impl SessionHostRunner for FakeRunner {
    fn retrieve_resources(&self, _start_info: &SessionHostsStartInfo) -> Result<()> {
        match *self.pull_failure.lock() {
            Some(outcome) => Err(Error::retrieval("image", outcome, "pull refused")),
            None => Ok(()),
        }
    }

    fn create_and_start(&self, launch: &LaunchSpec) -> Result<String> {
        if let Some(gate) = self.create_gate.lock().take() {
            let _ = gate.recv();
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::runner("create", "backend refused"));
        }
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.alive.lock().insert(id.clone());
        self.launches.lock().push(launch.clone());
        Ok(id)
    }

    fn is_alive(&self, type_specific_id: &str) -> bool {
        self.alive.lock().contains(type_specific_id)
    }

    fn stop(&self, type_specific_id: &str) -> Result<()> {
        self.alive.lock().remove(type_specific_id);
        self.stopped.lock().push(type_specific_id.to_string());
        Ok(())
    }

    fn collect_logs(&self, _type_specific_id: &str, log_folder: &Path) -> Result<()> {
        std::fs::create_dir_all(log_folder)?;
        Ok(())
    }

    fn delete(&self, type_specific_id: &str) -> Result<()> {
        self.deleted.lock().push(type_specific_id.to_string());
        Ok(())
    }

    fn delete_resources(&self, _start_info: &SessionHostsStartInfo) -> Result<()> {
        Ok(())
    }
}

/// Asset retriever that never has anything to fetch.
pub struct NoAssets;

impl AssetRetriever for NoAssets {
    fn download(&self, asset: &AssetDetail, _destination: &Path) -> Result<()> {
        Err(Error::retrieval(
            "asset",
            ResourceRetrievalResult::ResourceNotFound,
            format!("{} not available in tests", asset.download_uri),
        ))
    }
}

/// Certificate installer that accepts everything.
pub struct AcceptCertificates;

impl CertificateInstaller for AcceptCertificates {
    fn install(&self, _certificates: &[CertificateDetail], folder: &Path) -> Result<()> {
        std::fs::create_dir_all(folder)?;
        Ok(())
    }
}

/// Settings tuned for tests: no image pull retries.
pub fn test_settings(root: &Path) -> AgentSettings {
    let mut settings = AgentSettings {
        root_dir: root.display().to_string(),
        ..AgentSettings::default()
    };
    settings.image_pull.max_attempts = 1;
    settings
}

/// Context over `root` with `runner` serving both host types.
pub fn context(settings: AgentSettings, runner: Arc<FakeRunner>) -> Arc<AgentContext> {
    let vm = VmConfiguration::from_settings(&settings, "vm-test").unwrap();
    Arc::new(AgentContext {
        settings,
        vm,
        system: Arc::new(LocalSystemOperations::new()),
        runners: Runners {
            process: runner.clone(),
            container: runner,
        },
        assets: Arc::new(NoAssets),
        certificates: Arc::new(AcceptCertificates),
    })
}

/// Fresh manager over an empty root.
pub fn manager(root: &Path, runner: Arc<FakeRunner>) -> Arc<SessionHostsManager> {
    manager_with(test_settings(root), runner)
}

/// Manager over `settings`, restored from whatever is on disk.
pub fn manager_with(settings: AgentSettings, runner: Arc<FakeRunner>) -> Arc<SessionHostsManager> {
    Arc::new(SessionHostsManager::restore(context(settings, runner)).unwrap())
}

/// Process assignment for `count` hosts.
pub fn process_start_info(count: u32) -> SessionHostsStartInfo {
    serde_json::from_value(serde_json::json!({
        "assignmentId": "title1:build1:westus",
        "sessionHostType": "Process",
        "count": count,
        "startGameCommand": "./server --port 7777",
        "deploymentMetadata": { "stage": "test" },
        "gameSecrets": [{ "name": "apiKey", "value": "s3cr3t" }]
    }))
    .unwrap()
}

/// Container assignment for `count` hosts.
pub fn container_start_info(count: u32) -> SessionHostsStartInfo {
    serde_json::from_value(serde_json::json!({
        "assignmentId": "title1:build2:westus",
        "sessionHostType": "Container",
        "count": count,
        "imageDetails": {
            "registry": "myregistry.azurecr.io",
            "imageName": "game/server",
            "imageTag": "1.0",
            "username": "puller",
            "password": "hunter2"
        }
    }))
    .unwrap()
}

/// Assign and run propping to completion.
pub async fn assign_and_prop(manager: &SessionHostsManager, start_info: SessionHostsStartInfo) {
    manager.assign(start_info).unwrap();
    manager.run_assignment().await.unwrap();
}

/// Ids of every session host in the map.
pub fn session_host_ids(manager: &SessionHostsManager) -> Vec<String> {
    let mut ids: Vec<String> = manager
        .snapshot()
        .session_hosts_map
        .into_keys()
        .collect();
    ids.sort();
    ids
}
