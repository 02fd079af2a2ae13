//! Session host execution backends.
//!
//! A [`SessionHostRunner`] owns one kind of session host (process or
//! container). Runner calls are blocking and may take a long time (image
//! pulls, container creation); the lifecycle manager always invokes them
//! through `tokio::task::spawn_blocking`.

mod container;
mod process;

pub use container::{classify_pull_failure, ContainerRunner};
pub use process::ProcessRunner;

use crate::error::Result;
use crate::state::{SessionHostType, SessionHostsStartInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmagent_protocol::PortMapping;

/// A host directory made visible to a session host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Path on the VM.
    pub host_path: PathBuf,
    /// Path inside the container.
    pub guest_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

/// Everything a runner needs to start one session host.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// Heartbeat identity; also the container name.
    pub unique_id: String,
    /// Assignment the host serves.
    pub assignment_id: String,
    /// Slot number.
    pub instance_number: u32,
    /// Image reference (containers).
    pub image: Option<String>,
    /// Command line (processes).
    pub start_command: Option<String>,
    /// Environment for the game server.
    pub environment: Vec<(String, String)>,
    /// Ports to publish.
    pub port_mappings: Vec<PortMapping>,
    /// Folders to mount (containers).
    pub mounts: Vec<VolumeMount>,
    /// Working directory (processes).
    pub working_dir: PathBuf,
    /// Where stdout/stderr and collected logs go.
    pub log_folder: PathBuf,
}

/// Backend that creates, stops and deletes session hosts of one type.
pub trait SessionHostRunner: Send + Sync {
    /// Fetch backend resources for an assignment (pull the image).
    fn retrieve_resources(&self, start_info: &SessionHostsStartInfo) -> Result<()>;

    /// Create and start a session host. Returns its type-specific id.
    fn create_and_start(&self, launch: &LaunchSpec) -> Result<String>;

    /// Whether the backing process or container is still running.
    fn is_alive(&self, type_specific_id: &str) -> bool;

    /// Stop a session host, escalating to a kill after the stop timeout.
    fn stop(&self, type_specific_id: &str) -> Result<()>;

    /// Copy the host's output into `log_folder`.
    fn collect_logs(&self, type_specific_id: &str, log_folder: &Path) -> Result<()>;

    /// Remove every trace of the session host.
    fn delete(&self, type_specific_id: &str) -> Result<()>;

    /// Release backend resources for an assignment (remove the image).
    fn delete_resources(&self, start_info: &SessionHostsStartInfo) -> Result<()>;
}

/// The runner for each session host type.
#[derive(Clone)]
pub struct Runners {
    /// Process runner.
    pub process: Arc<dyn SessionHostRunner>,
    /// Container runner.
    pub container: Arc<dyn SessionHostRunner>,
}

impl Runners {
    /// Runner for `host_type`.
    pub fn for_type(&self, host_type: SessionHostType) -> Arc<dyn SessionHostRunner> {
        match host_type {
            SessionHostType::Process => self.process.clone(),
            SessionHostType::Container => self.container.clone(),
        }
    }
}

impl std::fmt::Debug for Runners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runners").finish_non_exhaustive()
    }
}
