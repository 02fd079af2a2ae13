//! Assignment document validation command.

use clap::Parser;
use std::path::PathBuf;

use vmagent::api::validation::validate_start_info;
use vmagent::state::SessionHostsStartInfo;
use vmagent::{Error, Result};

/// Check an assignment document without contacting the agent.
#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// Start info JSON file.
    #[arg(value_name = "START_INFO")]
    path: PathBuf,
}

impl ValidateCmd {
    /// Run the validate command.
    pub fn run(self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.path)?;
        let info: SessionHostsStartInfo = serde_json::from_str(&contents)
            .map_err(|e| Error::InvalidStartInfo(format!("{}: {}", self.path.display(), e)))?;
        validate_start_info(&info).map_err(|e| Error::InvalidStartInfo(e.to_string()))?;

        println!(
            "{}: valid {} assignment {} ({} session hosts)",
            self.path.display(),
            info.session_host_type,
            info.assignment_id,
            info.count
        );
        Ok(())
    }
}
