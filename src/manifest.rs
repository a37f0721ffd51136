//! Configuration file parsing for Rigging
//!
//! Parses `rigging.toml` configuration files using serde

use crate::error::{Error, Result};
use crate::ident;
use crate::network::provisioner::Switch;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Load configuration from a file
pub fn load(path: &Path) -> Result<RiggingConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: RiggingConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct RiggingConfig {
    /// Global configuration settings
    pub config: GlobalConfig,

    /// Virtual switches jails can attach to
    #[serde(default)]
    pub switches: Vec<Switch>,
}

impl RiggingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let length = self.config.token_length;
        if !ident::covers(length, u64::from(self.config.max_ctid)) {
            return Err(Error::ConfigValidation(format!(
                "token_length {} cannot give every ctid up to {} a unique token",
                length, self.config.max_ctid
            )));
        }

        // Interface names are capped at 15 chars: token + '_' + switch id + 'a'
        let longest_switch = self
            .switches
            .iter()
            .map(|s| s.id.to_string().len())
            .max()
            .unwrap_or(0);
        if length + longest_switch + 2 > 15 {
            return Err(Error::ConfigValidation(format!(
                "token_length {} makes epair names longer than 15 characters",
                length
            )));
        }

        let mut ids = HashSet::new();
        for switch in &self.switches {
            if switch.id == 0 {
                return Err(Error::ConfigValidation(format!(
                    "Switch '{}' has id 0",
                    switch.name
                )));
            }
            if !ids.insert(switch.id) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate switch id: {}",
                    switch.id
                )));
            }
            if switch.bridge.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "Switch '{}' has no bridge",
                    switch.name
                )));
            }
        }

        Ok(())
    }
}

/// Global configuration settings
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding the state file
    pub data_dir: PathBuf,

    /// Directory holding per-jail config directories
    pub jails_dir: PathBuf,

    /// Letters in a jail's identifier token
    #[serde(default = "default_token_length")]
    pub token_length: usize,

    /// Highest ctid accepted
    #[serde(default = "default_max_ctid")]
    pub max_ctid: u32,
}

fn default_token_length() -> usize {
    5
}

fn default_max_ctid() -> u32 {
    9999
}
