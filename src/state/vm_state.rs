//! VM-level assignment state.

use serde::{Deserialize, Serialize};

/// Assignment state of the whole VM.
///
/// The numeric values are a contract: a fleet-side caller picks the
/// healthiest VMs to release by comparing ordinals. Never renumber; only
/// append. Gaps 6, 8 and 11 belong to legacy names that are accepted on the
/// wire and mapped to their canonical state (see [`LEGACY_VM_STATES`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum VmState {
    /// Not yet initialized.
    #[default]
    Unknown = 0,
    /// No workload assigned.
    Unassigned = 1,
    /// Workload received, retrieval not started.
    Assigned = 2,
    /// Retrieving assets, images and certificates.
    Propping = 3,
    /// A resource needed to start session hosts could not be retrieved.
    ProppingFailed = 4,
    /// All required resources are in place.
    ProppingCompleted = 5,
    /// No session host could be created.
    #[serde(alias = "ServerStartFailed")]
    StartServersFailed = 7,
    /// At least one session host is heartbeating.
    #[serde(alias = "PartiallyRunning")]
    Running = 9,
    /// Unassignment requested; tearing down.
    PendingResourceCleanup = 10,
    /// Every session host and resource is gone.
    #[serde(alias = "SessionHostsRemoved")]
    ServersRemoved = 12,
    /// Session hosts keep exiting; needs external intervention.
    TooManyServerRestarts = 13,
}

/// Legacy names kept for wire compatibility: `(name, ordinal, canonical)`.
pub const LEGACY_VM_STATES: &[(&str, u8, VmState)] = &[
    ("ServerStartFailed", 6, VmState::StartServersFailed),
    ("PartiallyRunning", 8, VmState::Running),
    ("SessionHostsRemoved", 11, VmState::ServersRemoved),
];

const ALL_VM_STATES: [VmState; 11] = [
    VmState::Unknown,
    VmState::Unassigned,
    VmState::Assigned,
    VmState::Propping,
    VmState::ProppingFailed,
    VmState::ProppingCompleted,
    VmState::StartServersFailed,
    VmState::Running,
    VmState::PendingResourceCleanup,
    VmState::ServersRemoved,
    VmState::TooManyServerRestarts,
];

impl VmState {
    /// Stable numeric value.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Resolve an ordinal, mapping legacy values to their canonical state.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        ALL_VM_STATES
            .iter()
            .copied()
            .find(|s| s.ordinal() == ordinal)
            .or_else(|| {
                LEGACY_VM_STATES
                    .iter()
                    .find(|(_, legacy, _)| *legacy == ordinal)
                    .map(|(_, _, canonical)| *canonical)
            })
    }

    /// A workload is bound to the VM.
    pub fn is_assigned(self) -> bool {
        !matches!(self, VmState::Unknown | VmState::Unassigned)
    }

    /// Session hosts may be created or replaced.
    pub fn accepts_new_session_hosts(self) -> bool {
        matches!(self, VmState::ProppingCompleted | VmState::Running)
    }

    /// Teardown is requested or under way.
    pub fn is_unassigning(self) -> bool {
        matches!(self, VmState::PendingResourceCleanup | VmState::ServersRemoved)
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_pinned() {
        let expected = [
            (VmState::Unknown, 0),
            (VmState::Unassigned, 1),
            (VmState::Assigned, 2),
            (VmState::Propping, 3),
            (VmState::ProppingFailed, 4),
            (VmState::ProppingCompleted, 5),
            (VmState::StartServersFailed, 7),
            (VmState::Running, 9),
            (VmState::PendingResourceCleanup, 10),
            (VmState::ServersRemoved, 12),
            (VmState::TooManyServerRestarts, 13),
        ];
        for (state, ordinal) in expected {
            assert_eq!(state.ordinal(), ordinal, "{}", state);
            assert_eq!(VmState::from_ordinal(ordinal), Some(state));
        }
        assert_eq!(ALL_VM_STATES.len(), expected.len());
    }

    #[test]
    fn test_ordering_follows_ordinals() {
        assert!(VmState::Running > VmState::StartServersFailed);
        assert!(VmState::TooManyServerRestarts > VmState::ServersRemoved);
        let mut sorted = ALL_VM_STATES;
        sorted.sort();
        assert_eq!(sorted, ALL_VM_STATES);
    }

    #[test]
    fn test_legacy_ordinals_map_to_canonical() {
        assert_eq!(VmState::from_ordinal(6), Some(VmState::StartServersFailed));
        assert_eq!(VmState::from_ordinal(8), Some(VmState::Running));
        assert_eq!(VmState::from_ordinal(11), Some(VmState::ServersRemoved));
        assert_eq!(VmState::from_ordinal(14), None);
    }

    #[test]
    fn test_legacy_names_deserialize() {
        for (name, _, canonical) in LEGACY_VM_STATES {
            let parsed: VmState = serde_json::from_str(&format!("\"{}\"", name)).unwrap();
            assert_eq!(parsed, *canonical);
        }
        // Canonical names are what gets written
        assert_eq!(
            serde_json::to_string(&VmState::ServersRemoved).unwrap(),
            "\"ServersRemoved\""
        );
    }
}
