//! VM and session host state model.
//!
//! [`VmPersistedState`] is the durable root: it is what gets written to
//! `state.json` and what the agent resumes from after a restart.

mod persisted;
mod resources;
mod session_host;
mod store;
mod vm_state;

pub use persisted::{
    AssignmentData, SessionHostSnapshot, VmCondition, VmPersistedState, PERSISTED_FORMAT_VERSION,
};
pub use resources::{
    AssetDetail, CertificateDetail, ContainerImageDetails, GameSecret, ResourceRetrievalResult,
    SessionHostsStartInfo,
};
pub use session_host::{
    is_live_status, is_valid_transition, GoalState, SessionHostInfo, SessionHostType,
};
pub use store::{LoadOutcome, StateStore};
pub use vm_state::{VmState, LEGACY_VM_STATES};

pub use vmagent_protocol::SessionHostStatus;
