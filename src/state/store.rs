//! Durable storage for [`VmPersistedState`].
//!
//! The state lives in a single JSON file. Saves write a temp file in the
//! same directory, fsync it, then atomically rename it over the old file, so
//! a crash mid-save leaves either the old or the new document.

use super::VmPersistedState;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What [`StateStore::load_or_recover`] found on disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A previous state was loaded.
    Restored(VmPersistedState),
    /// No state file existed.
    Fresh(VmPersistedState),
    /// The file was unreadable and has been moved aside.
    Recovered {
        /// The clean state used instead.
        state: VmPersistedState,
        /// Where the bad file was moved.
        quarantined_to: PathBuf,
        /// Why it was rejected.
        reason: String,
    },
}

/// Handle to the persisted state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file.
    ///
    /// Returns `Ok(None)` when it does not exist.
    pub fn load(&self) -> Result<Option<VmPersistedState>> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::persistence("read", e.to_string())),
        };

        let state: VmPersistedState = serde_json::from_slice(&contents)
            .map_err(|e| Error::persistence("parse", e.to_string()))?;

        if !state.is_compatible() {
            return Err(Error::persistence(
                "parse",
                format!("unsupported format version {}", state.format_version),
            ));
        }
        Ok(Some(state))
    }

    /// Load the state, falling back to a clean unassigned state if the file
    /// is unusable. A half-read document is never returned.
    pub fn load_or_recover(&self) -> LoadOutcome {
        match self.load() {
            Ok(Some(state)) => LoadOutcome::Restored(state),
            Ok(None) => LoadOutcome::Fresh(VmPersistedState::unassigned()),
            Err(e) => {
                let quarantined_to = self.path.with_extension("json.corrupt");
                if let Err(rename_err) = std::fs::rename(&self.path, &quarantined_to) {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %rename_err,
                        "failed to move unreadable state file aside"
                    );
                }
                LoadOutcome::Recovered {
                    state: VmPersistedState::unassigned(),
                    quarantined_to,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Atomically replace the state file.
    pub fn save(&self, state: &VmPersistedState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::persistence("serialize", e.to_string()))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::persistence("create directory", e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::persistence("create temp file", e.to_string()))?;
        temp.write_all(&json)
            .map_err(|e| Error::persistence("write", e.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::persistence("sync", e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| Error::persistence("rename", e.error.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VmState;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));

        let mut state = VmPersistedState::unassigned();
        state.vm_state = VmState::ProppingCompleted;
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);

        // Only the state file remains, no temp leftovers
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn test_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
        assert!(matches!(store.load_or_recover(), LoadOutcome::Fresh(_)));
    }

    #[test]
    fn test_corrupt_file_recovers_to_unassigned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{\"vmState\": \"Running\", \"sessionHostsMap\": {").unwrap();

        let store = StateStore::new(&path);
        match store.load_or_recover() {
            LoadOutcome::Recovered {
                state,
                quarantined_to,
                ..
            } => {
                assert_eq!(state.vm_state, VmState::Unassigned);
                assert!(state.session_hosts_map.is_empty());
                assert!(quarantined_to.exists());
                assert!(!path.exists());
            }
            other => panic!("expected recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = VmPersistedState::unassigned();
        state.format_version = 99;
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        let store = StateStore::new(&path);
        assert!(matches!(store.load(), Err(Error::Persistence { .. })));
        assert!(matches!(
            store.load_or_recover(),
            LoadOutcome::Recovered { .. }
        ));
    }
}
