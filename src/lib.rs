//! vmagent - game server VM host agent
//!
//! vmagent runs on every VM of a game server fleet. It receives an
//! assignment from the control plane, retrieves the assets, container image
//! and certificates it names, starts the requested number of session hosts
//! (game server processes or containers) and supervises them through the
//! heartbeats their game server SDK sends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  HTTP API (heartbeats, assignment, maintenance) │
//! ├─────────────────────────────────────────────────┤
//! │  SessionHostsManager + Supervisor sweep         │
//! ├──────────────────────┬──────────────────────────┤
//! │  SessionHostRunner   │  Asset / certificate     │
//! │  (process, docker)   │  retrieval               │
//! ├──────────────────────┴──────────────────────────┤
//! │  StateStore (atomic JSON persistence)           │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # VM lifecycle
//!
//! ```text
//! Unassigned -> Assigned -> Propping -> ProppingCompleted -> Running
//!                              |                  |
//!                        ProppingFailed    StartServersFailed
//!
//! Running -> PendingResourceCleanup -> ServersRemoved -> Unassigned
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod process;
pub mod resources;
pub mod retry;
pub mod runner;
pub mod session_config;
pub mod state;
pub mod system;
pub mod util;

// Re-export main types for convenience
pub use config::{AgentSettings, VmConfiguration, VmDirectories};
pub use error::{Error, Result};
pub use lifecycle::{AgentContext, SessionHostsManager};
pub use runner::{LaunchSpec, Runners, SessionHostRunner};
pub use state::{
    SessionHostInfo, SessionHostStatus, SessionHostsStartInfo, VmPersistedState, VmState,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
