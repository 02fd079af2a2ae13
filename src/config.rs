//! Agent configuration.
//!
//! [`AgentSettings`] holds the tunables read from the agent's TOML config
//! file. [`VmConfiguration`] and [`VmDirectories`] hold the static facts about
//! this VM: its id, public address and the folder layout every session host
//! relies on.

use crate::error::{Error, Result};
use crate::state::SessionHostStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name, used for the default data directory.
const APP_NAME: &str = "vmagent";

/// Default listen address for the heartbeat and control API.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:56001";

/// Default location of the settings file: `<config dir>/vmagent/vmagent.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join(APP_NAME)
        .join("vmagent.toml")
}

/// Agent settings loaded from `vmagent.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Config format version.
    pub version: u8,

    /// Address the HTTP API binds to.
    pub listen: String,

    /// Root folder for state, assets, logs and per-instance data.
    /// Empty means the platform data directory.
    pub root_dir: String,

    /// Interval the SDK is told to wait between heartbeats.
    pub heartbeat_interval_ms: u32,

    /// Interval of the supervisor sweep (durations, replacement, save).
    pub sweep_interval_secs: u64,

    /// Per-state duration limits.
    pub state_limits: StateDurationLimits,

    /// Image pull retry budget.
    pub image_pull: ImagePullRetry,

    /// Host exits allowed inside `restart_window_secs` before the VM is
    /// declared `TooManyServerRestarts`.
    pub max_restarts_in_window: u32,

    /// Window for the restart-rate detector.
    pub restart_window_secs: u64,

    /// Do not create new session hosts while maintenance is scheduled.
    pub suppress_creation_during_maintenance: bool,

    /// Keep extracted assets across reassignment and skip re-extraction.
    pub retain_assets_on_reassignment: bool,

    /// Seconds to wait for a session host to stop before killing it.
    pub stop_timeout_secs: u64,

    /// Address containers use to reach the heartbeat endpoint.
    pub container_heartbeat_host: String,

    /// Container runtime CLI.
    pub docker_binary: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            version: 1,
            listen: DEFAULT_LISTEN.to_string(),
            root_dir: String::new(),
            heartbeat_interval_ms: vmagent_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS,
            sweep_interval_secs: 5,
            state_limits: StateDurationLimits::default(),
            image_pull: ImagePullRetry::default(),
            max_restarts_in_window: 20,
            restart_window_secs: 600,
            suppress_creation_during_maintenance: false,
            retain_assets_on_reassignment: false,
            stop_timeout_secs: 10,
            container_heartbeat_host: "172.17.0.1".to_string(),
            docker_binary: "docker".to_string(),
        }
    }
}

impl AgentSettings {
    /// Load settings from a TOML file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config("read", format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse settings from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(contents).map_err(|e| Error::config("parse", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::config("validate", "heartbeat_interval_ms must be > 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::config("validate", "sweep_interval_secs must be > 0"));
        }
        if self.image_pull.max_attempts == 0 {
            return Err(Error::config("validate", "image_pull.max_attempts must be > 0"));
        }
        Ok(())
    }

    /// Resolved root directory.
    pub fn root_path(&self) -> PathBuf {
        if !self.root_dir.is_empty() {
            return PathBuf::from(&self.root_dir);
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join(APP_NAME)
    }

    /// Supervisor tick interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Restart-rate detector window.
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    /// Graceful stop timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Maximum time a session host may stay in a state before it is
/// force-terminated. `None` means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateDurationLimits {
    /// Created, no heartbeat yet.
    pub pending_heartbeat_secs: Option<u64>,
    /// Game server loading.
    pub initializing_secs: Option<u64>,
    /// Waiting for allocation.
    pub standing_by_secs: Option<u64>,
    /// Hosting a session.
    pub active_secs: Option<u64>,
    /// Shutting down. Usually much shorter than the others.
    pub terminating_secs: Option<u64>,
    /// Quarantined.
    pub quarantined_secs: Option<u64>,
}

impl Default for StateDurationLimits {
    fn default() -> Self {
        Self {
            pending_heartbeat_secs: Some(10 * 60),
            initializing_secs: Some(30 * 60),
            standing_by_secs: None,
            active_secs: None,
            terminating_secs: Some(5 * 60),
            quarantined_secs: None,
        }
    }
}

impl StateDurationLimits {
    /// Limit for `status`.
    ///
    /// `override_secs` comes from the assignment and replaces every bounded
    /// limit except `Terminating`, which keeps its own bound.
    pub fn limit_for(
        &self,
        status: SessionHostStatus,
        override_secs: Option<u64>,
    ) -> Option<Duration> {
        let configured = match status {
            // A host never leaves `Invalid` on its own; bound it like a silent one.
            SessionHostStatus::Invalid | SessionHostStatus::PendingHeartbeat => {
                self.pending_heartbeat_secs
            }
            SessionHostStatus::Initializing => self.initializing_secs,
            SessionHostStatus::StandingBy => self.standing_by_secs,
            SessionHostStatus::Active => self.active_secs,
            SessionHostStatus::Terminating => {
                return self.terminating_secs.map(Duration::from_secs);
            }
            SessionHostStatus::Quarantined => self.quarantined_secs,
            SessionHostStatus::Terminated => None,
        };
        configured
            .map(|secs| override_secs.unwrap_or(secs))
            .map(Duration::from_secs)
    }
}

/// Bounded retry budget for image pulls.
///
/// The total window is split evenly between the attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImagePullRetry {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Total time budget for all waits between attempts.
    pub total_window_secs: u64,
}

impl Default for ImagePullRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            total_window_secs: 120,
        }
    }
}

impl ImagePullRetry {
    /// Wait between two consecutive attempts.
    pub fn wait_between_attempts(&self) -> Duration {
        let waits = self.max_attempts.saturating_sub(1).max(1);
        Duration::from_secs(self.total_window_secs) / waits
    }
}

/// Static facts about this VM.
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfiguration {
    /// VM identifier reported to game servers.
    pub vm_id: String,
    /// Public IPv4 address of the VM, if known.
    pub public_ipv4_address: Option<String>,
    /// Fully qualified domain name of the VM, if known.
    pub fqdn: Option<String>,
    /// Port the agent's HTTP API listens on.
    pub agent_port: u16,
    /// Folder layout.
    pub directories: VmDirectories,
}

impl VmConfiguration {
    /// Build the configuration from settings.
    pub fn from_settings(settings: &AgentSettings, vm_id: impl Into<String>) -> Result<Self> {
        let agent_port = settings
            .listen
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .ok_or_else(|| {
                Error::config("parse", format!("invalid listen address '{}'", settings.listen))
            })?;
        Ok(Self {
            vm_id: vm_id.into(),
            public_ipv4_address: None,
            fqdn: None,
            agent_port,
            directories: VmDirectories::new(settings.root_path()),
        })
    }
}

/// Folder layout under the agent root.
///
/// ```text
/// {root}/
/// ├── state.json              # persisted VM state
/// ├── downloads/              # raw asset archives
/// ├── assets/asset{i}/        # extracted assets shared by containers
/// ├── certificates/           # installed certificates (read-shared)
/// ├── shared_content/         # read-shared by all hosts
/// ├── instances/{n}/          # per-slot working dir, config, process assets
/// └── logs/{log_folder_id}/   # per-host logs
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VmDirectories {
    /// Agent root.
    pub root: PathBuf,
}

impl VmDirectories {
    /// Create the layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persisted state file.
    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Raw asset downloads.
    pub fn downloads(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Shared extraction folder for asset `index`.
    pub fn asset(&self, index: usize) -> PathBuf {
        self.root.join("assets").join(format!("asset{}", index))
    }

    /// Root of all shared asset extractions.
    pub fn assets_root(&self) -> PathBuf {
        self.root.join("assets")
    }

    /// Installed certificates.
    pub fn certificates(&self) -> PathBuf {
        self.root.join("certificates")
    }

    /// Shared content.
    pub fn shared_content(&self) -> PathBuf {
        self.root.join("shared_content")
    }

    /// Working folder owned by instance slot `instance_number`.
    pub fn instance(&self, instance_number: u32) -> PathBuf {
        self.root.join("instances").join(instance_number.to_string())
    }

    /// Root of all instance folders.
    pub fn instances_root(&self) -> PathBuf {
        self.root.join("instances")
    }

    /// Config folder of an instance slot.
    pub fn instance_config(&self, instance_number: u32) -> PathBuf {
        self.instance(instance_number).join("config")
    }

    /// Log folder for a session host.
    pub fn logs(&self, log_folder_id: &str) -> PathBuf {
        self.root.join("logs").join(log_folder_id)
    }

    /// Crash dump folder for a session host.
    pub fn dumps(&self, log_folder_id: &str) -> PathBuf {
        self.logs(log_folder_id).join("dumps")
    }
}
