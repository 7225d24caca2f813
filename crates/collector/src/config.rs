//! Collector configuration
//!
//! Read from an optional file named by `COLLECTOR_CONFIG`, overridden by
//! `COLLECTOR_*` environment variables. List values (`kinds`, `namespaces`)
//! are comma separated in the environment.

use anyhow::{anyhow, Context, Result};
use dataset_lib::cluster::ClusterConnection;
use dataset_lib::collector::{EmitterConfig, ObjectKind, WatcherConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "COLLECTOR";
const CONFIG_PATH_VAR: &str = "COLLECTOR_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Object kinds to watch
    #[serde(default = "default_kinds")]
    pub kinds: Vec<String>,

    /// Namespaces to keep; empty keeps all
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Emit every existing object before streaming changes
    #[serde(default)]
    pub emit_initial: bool,

    #[serde(default = "default_stdout")]
    pub stdout: bool,

    /// NDJSON file requests are appended to
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// Fire-and-forget POST target for each request
    #[serde(default)]
    pub post_url: Option<String>,

    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub verify_tls: Option<bool>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_kinds() -> Vec<String> {
    ObjectKind::DEFAULT.iter().map(|k| k.to_string()).collect()
}

fn default_stdout() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_dedup_ttl() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    10
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60
}

impl CollectorConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
        Self::from_sources(file.as_deref(), None)
    }

    /// `env` replaces the process environment when given
    pub fn from_sources(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("kinds")
                .with_list_parse_key("namespaces")
                .source(env),
        );

        let config: Self = builder
            .build()
            .context("Failed to read collector configuration")?
            .try_deserialize()
            .context("Invalid collector configuration")?;
        Ok(config)
    }

    pub fn object_kinds(&self) -> Result<Vec<ObjectKind>> {
        let mut kinds = Vec::new();
        for raw in &self.kinds {
            let kind: ObjectKind = raw.parse().map_err(|e: String| anyhow!(e))?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            return Err(anyhow!("no object kinds configured"));
        }
        Ok(kinds)
    }

    pub fn watcher_configs(&self) -> Result<Vec<WatcherConfig>> {
        Ok(self
            .object_kinds()?
            .into_iter()
            .map(|kind| {
                WatcherConfig::new(kind)
                    .with_namespaces(self.namespaces.clone())
                    .with_emit_initial(self.emit_initial)
                    .with_backoff(
                        Duration::from_millis(self.initial_backoff_ms),
                        Duration::from_secs(self.max_backoff_secs),
                    )
                    .with_max_retries(self.max_retries)
                    .with_dedup_ttl(Duration::from_secs(self.dedup_ttl_secs))
            })
            .collect())
    }

    pub fn emitter_config(&self) -> EmitterConfig {
        EmitterConfig {
            stdout: self.stdout,
            output_path: self.output_path.clone(),
            post_url: self.post_url.clone(),
            ..Default::default()
        }
    }

    pub fn connection(&self) -> ClusterConnection {
        ClusterConnection {
            kubeconfig: self.kubeconfig.clone(),
            ca_file: self.ca_file.clone(),
            verify_tls: self.verify_tls,
        }
    }
}
