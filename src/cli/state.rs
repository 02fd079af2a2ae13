//! Persisted state inspection command.

use clap::Parser;
use std::path::PathBuf;

use vmagent::config::VmDirectories;
use vmagent::state::StateStore;
use vmagent::{Error, Result};

/// Print the persisted state with every secret removed.
#[derive(Parser, Debug)]
pub struct StateCmd {
    /// Settings file (TOML). Defaults to the platform config directory.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Root folder, overrides the settings file.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
}

impl StateCmd {
    /// Run the state command.
    pub fn run(self) -> Result<()> {
        let root = match self.root {
            Some(root) => root,
            None => super::load_settings(self.config.as_deref())?.root_path(),
        };
        let store = StateStore::new(VmDirectories::new(root).state_file());

        let Some(state) = store.load()? else {
            println!("no persisted state at {}", store.path().display());
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&state.redacted())
            .map_err(|e| Error::persistence("serialize", e.to_string()))?;
        println!("{}", json);
        Ok(())
    }
}
