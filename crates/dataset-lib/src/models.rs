//! Core data models shared by the feature and label pipelines

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Current InferenceRequest schema version
pub const SCHEMA_VERSION: &str = "v1";

/// Kind of the top-level controller owning a pod template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WorkloadKind {
    Deployment,
    Job,
    CronJob,
    Pod,
    StatefulSet,
    DaemonSet,
    /// Controllers we pass through untouched (custom resources, etc.)
    Other(String),
}

impl WorkloadKind {
    pub fn as_str(&self) -> &str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Deployment" => WorkloadKind::Deployment,
            "Job" => WorkloadKind::Job,
            "CronJob" => WorkloadKind::CronJob,
            "Pod" => WorkloadKind::Pod,
            "StatefulSet" => WorkloadKind::StatefulSet,
            "DaemonSet" => WorkloadKind::DaemonSet,
            other => WorkloadKind::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for WorkloadKind {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkloadKind> for String {
    fn from(kind: WorkloadKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Canonical identity of a workload (the top-level controller)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
}

impl Workload {
    pub fn new(kind: WorkloadKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Resource footprint of one container, in millicores and MiB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub req_cpu_mcpu: u64,
    #[serde(default)]
    pub req_mem_mib: u64,
    #[serde(default)]
    pub lim_cpu_mcpu: u64,
    #[serde(default)]
    pub lim_mem_mib: u64,
}

/// Canonical snapshot of one workload's pod template at observation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub init_container_count: u32,
    #[serde(default)]
    pub sidecar_count: u32,
    #[serde(default)]
    pub volume_types: BTreeSet<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub runtime_class: Option<String>,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub parallelism: Option<i32>,
    #[serde(default)]
    pub completions: Option<i32>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl InferenceRequest {
    /// Canonical workload identity of this request
    pub fn workload(&self) -> Workload {
        Workload::new(self.workload_kind.clone(), self.workload_name.clone())
    }

    /// Stable hash of the normalized workload template (16 hex chars)
    ///
    /// Maps and sets are ordered, so the JSON form is canonical.
    pub fn spec_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(digest)[..16].to_string()
    }

    /// Serialize as a single NDJSON line (without the trailing newline)
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One labeled time step of one pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRow {
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    pub spec_hash: Option<String>,
    pub pod_uid: String,
    /// Unix timestamp (seconds) at the end of the step
    pub timestamp: f64,
    pub avg_power_w: Option<f64>,
    pub energy_step_j: f64,
}

/// One workload collapsed over the full query range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    pub spec_hash: Option<String>,
    /// Set only when exactly one pod contributed
    pub pod_uid: Option<String>,
    pub pod_count: u32,
    pub avg_power_w: Option<f64>,
    pub total_energy_j: f64,
}

/// Label aggregation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Window,
    Job,
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMode::Window => f.write_str("window"),
            AggregationMode::Job => f.write_str("job"),
        }
    }
}

impl FromStr for AggregationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "window" => Ok(AggregationMode::Window),
            "job" => Ok(AggregationMode::Job),
            other => Err(format!("unknown aggregation mode: {}", other)),
        }
    }
}

/// Label table in one of its two shapes
#[derive(Debug, Clone, PartialEq)]
pub enum LabelTable {
    Window(Vec<WindowRow>),
    Job(Vec<JobRow>),
}

impl LabelTable {
    pub fn mode(&self) -> AggregationMode {
        match self {
            LabelTable::Window(_) => AggregationMode::Window,
            LabelTable::Job(_) => AggregationMode::Job,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LabelTable::Window(rows) => rows.len(),
            LabelTable::Job(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row of the externally produced feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    #[serde(default, alias = "_spec_hash")]
    pub spec_hash: Option<String>,
    pub features: Vec<f64>,
}

/// Row of the training table: feature columns plus label columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    pub spec_hash: Option<String>,
    pub features: Vec<f64>,
    pub pod_uid: Option<String>,
    /// Window rows only
    pub timestamp: Option<f64>,
    pub avg_power_w: Option<f64>,
    /// Window rows only
    pub energy_step_j: Option<f64>,
    /// Job rows only
    pub total_energy_j: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> InferenceRequest {
        InferenceRequest {
            schema_version: SCHEMA_VERSION.to_string(),
            namespace: "default".to_string(),
            workload_kind: WorkloadKind::Deployment,
            workload_name: "nginx".to_string(),
            labels: BTreeMap::from([("app".to_string(), "nginx".to_string())]),
            annotations: BTreeMap::new(),
            containers: vec![ContainerSpec {
                name: "nginx".to_string(),
                image: "nginx:1.25".to_string(),
                req_cpu_mcpu: 100,
                req_mem_mib: 128,
                ..Default::default()
            }],
            init_container_count: 0,
            sidecar_count: 0,
            volume_types: BTreeSet::new(),
            node_type: None,
            runtime_class: None,
            gpu_count: 0,
            parallelism: None,
            completions: None,
        }
    }

    #[test]
    fn test_workload_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&WorkloadKind::CronJob).unwrap();
        assert_eq!(json, "\"CronJob\"");

        let kind: WorkloadKind = serde_json::from_str("\"Rollout\"").unwrap();
        assert_eq!(kind, WorkloadKind::Other("Rollout".to_string()));
    }

    #[test]
    fn test_spec_hash_is_stable_and_sensitive() {
        let a = sample_request();
        let mut b = sample_request();
        assert_eq!(a.spec_hash(), b.spec_hash());
        assert_eq!(a.spec_hash().len(), 16);

        b.containers[0].req_cpu_mcpu = 200;
        assert_ne!(a.spec_hash(), b.spec_hash());
    }

    #[test]
    fn test_inference_request_defaults_on_decode() {
        let line = r#"{"namespace":"ns1","workload_kind":"Job","workload_name":"etl","containers":[]}"#;
        let ir: InferenceRequest = serde_json::from_str(line).unwrap();
        assert_eq!(ir.schema_version, "v1");
        assert_eq!(ir.gpu_count, 0);
        assert!(ir.volume_types.is_empty());
    }

    #[test]
    fn test_feature_row_accepts_underscore_hash_column() {
        let row: FeatureRow = serde_json::from_str(
            r#"{"namespace":"ns1","workload_kind":"Deployment","workload_name":"nginx","_spec_hash":"abc","features":[1.0]}"#,
        )
        .unwrap();
        assert_eq!(row.spec_hash.as_deref(), Some("abc"));
    }
}
