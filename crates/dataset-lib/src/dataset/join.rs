//! Feature/label join
//!
//! Inner join on `(namespace, canonical workload name[, spec_hash])`. Both
//! sides are normalized and canonicalized before keys are compared, so a
//! feature row written for a ReplicaSet or a Deployment pod still meets the
//! labels of its Deployment.

use crate::canonical::canonicalize_loose;
use crate::models::{FeatureRow, LabelTable, TrainingRow, Workload, WorkloadKind};
use crate::observability::StructuredLogger;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::warn;

/// Fewer matched keys than this share of the smaller side is reported as sparse
const SPARSE_RATIO: f64 = 0.10;

/// Keys shown per side when a join comes back empty
const SAMPLE_KEYS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinKey {
    pub namespace: String,
    pub workload_name: String,
    pub spec_hash: Option<String>,
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workload_name)?;
        if let Some(hash) = &self.spec_hash {
            write!(f, "@{}", hash)?;
        }
        Ok(())
    }
}

/// Outcome of a join
///
/// `KeyMismatch` means both inputs had rows but no key lined up, which
/// usually points at inconsistent canonicalization upstream rather than at
/// missing measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    Matched,
    Sparse,
    KeyMismatch,
    NoFeatures,
    NoLabels,
}

impl JoinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStatus::Matched => "matched",
            JoinStatus::Sparse => "sparse",
            JoinStatus::KeyMismatch => "key_mismatch",
            JoinStatus::NoFeatures => "no_features",
            JoinStatus::NoLabels => "no_labels",
        }
    }
}

impl fmt::Display for JoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinDiagnostics {
    pub feature_keys: usize,
    pub label_keys: usize,
    pub matched_keys: usize,
    /// Only filled when nothing matched
    pub feature_samples: Vec<String>,
    pub label_samples: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JoinReport {
    pub rows: Vec<TrainingRow>,
    pub status: JoinStatus,
    pub diagnostics: JoinDiagnostics,
}

pub struct DatasetJoiner {
    match_spec_hash: bool,
    logger: StructuredLogger,
}

impl Default for DatasetJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetJoiner {
    pub fn new() -> Self {
        Self {
            match_spec_hash: false,
            logger: StructuredLogger::new("joiner"),
        }
    }

    /// Also require `spec_hash` to match; a missing hash only meets a
    /// missing hash
    pub fn with_spec_hash(mut self, enabled: bool) -> Self {
        self.match_spec_hash = enabled;
        self
    }

    fn key(&self, namespace: &str, workload: &Workload, spec_hash: Option<&str>) -> JoinKey {
        JoinKey {
            namespace: namespace.trim().to_ascii_lowercase(),
            workload_name: workload.name.clone(),
            spec_hash: if self.match_spec_hash {
                spec_hash
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
            } else {
                None
            },
        }
    }

    /// Join features to labels; neither input is modified
    pub fn join(&self, features: &[FeatureRow], labels: &LabelTable) -> JoinReport {
        // Later feature rows replace earlier ones for the same key
        let mut by_key: HashMap<JoinKey, (Workload, &FeatureRow)> = HashMap::new();
        for row in features {
            let workload = canonicalize_loose(row.workload_kind.as_str(), &row.workload_name);
            let key = self.key(&row.namespace, &workload, row.spec_hash.as_deref());
            by_key.insert(key, (workload, row));
        }

        let label_keys: Vec<JoinKey> = match labels {
            LabelTable::Window(rows) => rows
                .iter()
                .map(|r| self.label_key(&r.namespace, &r.workload_kind, &r.workload_name, r.spec_hash.as_deref()))
                .collect(),
            LabelTable::Job(rows) => rows
                .iter()
                .map(|r| self.label_key(&r.namespace, &r.workload_kind, &r.workload_name, r.spec_hash.as_deref()))
                .collect(),
        };

        let mut rows = Vec::new();
        for (i, key) in label_keys.iter().enumerate() {
            let Some((workload, feature)) = by_key.get(key) else {
                continue;
            };
            let mut row = TrainingRow {
                namespace: key.namespace.clone(),
                workload_kind: workload.kind.clone(),
                workload_name: workload.name.clone(),
                spec_hash: feature.spec_hash.clone(),
                features: feature.features.clone(),
                pod_uid: None,
                timestamp: None,
                avg_power_w: None,
                energy_step_j: None,
                total_energy_j: None,
            };
            match labels {
                LabelTable::Window(labels) => {
                    let label = &labels[i];
                    row.pod_uid = Some(label.pod_uid.clone());
                    row.timestamp = Some(label.timestamp);
                    row.avg_power_w = label.avg_power_w;
                    row.energy_step_j = Some(label.energy_step_j);
                }
                LabelTable::Job(labels) => {
                    let label = &labels[i];
                    row.pod_uid = label.pod_uid.clone();
                    row.avg_power_w = label.avg_power_w;
                    row.total_energy_j = Some(label.total_energy_j);
                }
            }
            rows.push(row);
        }

        let feature_set: BTreeSet<&JoinKey> = by_key.keys().collect();
        let label_set: BTreeSet<&JoinKey> = label_keys.iter().collect();
        let matched = feature_set.intersection(&label_set).count();

        let mut diagnostics = JoinDiagnostics {
            feature_keys: feature_set.len(),
            label_keys: label_set.len(),
            matched_keys: matched,
            ..Default::default()
        };

        let status = classify(&diagnostics);
        if status == JoinStatus::KeyMismatch {
            diagnostics.feature_samples = sample(&feature_set);
            diagnostics.label_samples = sample(&label_set);
            warn!(
                feature_samples = ?diagnostics.feature_samples,
                label_samples = ?diagnostics.label_samples,
                "Join produced no rows although both tables have data, check key canonicalization"
            );
        }

        self.logger.log_join(
            status.as_str(),
            rows.len(),
            diagnostics.feature_keys,
            diagnostics.label_keys,
        );

        JoinReport {
            rows,
            status,
            diagnostics,
        }
    }

    fn label_key(
        &self,
        namespace: &str,
        kind: &WorkloadKind,
        name: &str,
        spec_hash: Option<&str>,
    ) -> JoinKey {
        let workload = canonicalize_loose(kind.as_str(), name);
        self.key(namespace, &workload, spec_hash)
    }
}

fn classify(d: &JoinDiagnostics) -> JoinStatus {
    if d.feature_keys == 0 {
        return JoinStatus::NoFeatures;
    }
    if d.label_keys == 0 {
        return JoinStatus::NoLabels;
    }
    if d.matched_keys == 0 {
        return JoinStatus::KeyMismatch;
    }
    let smaller = d.feature_keys.min(d.label_keys) as f64;
    if (d.matched_keys as f64) < smaller * SPARSE_RATIO {
        JoinStatus::Sparse
    } else {
        JoinStatus::Matched
    }
}

fn sample(keys: &BTreeSet<&JoinKey>) -> Vec<String> {
    keys.iter().take(SAMPLE_KEYS).map(|k| k.to_string()).collect()
}
