//! CLI command implementations.

pub mod parsers;
pub mod serve;
pub mod state;
pub mod validate;

use std::path::Path;
use vmagent::config::{default_config_path, AgentSettings};
use vmagent::Result;

/// Load settings from `path`, or from the default location when none is
/// given. A missing file yields the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<AgentSettings> {
    match path {
        Some(path) => AgentSettings::load(path),
        None => AgentSettings::load(&default_config_path()),
    }
}
