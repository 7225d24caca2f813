//! User defaults for the CLI
//!
//! Read from `~/.config/pds/config.json`; command-line flags and their
//! environment variables take precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Metrics backend base URL
    pub prometheus_url: Option<String>,
    /// Owner resolution strategy (`auto`, `metrics`, `api`)
    pub owner_source: Option<String>,
    /// Query step, e.g. `60s`
    pub step: Option<String>,
    /// Namespaces to keep when none are given on the command line
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl Config {
    /// Load the user configuration, or defaults when there is none
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("pds").join("config.json"))
    }
}
