//! Workload observation: cluster watch → canonical InferenceRequest stream
//!
//! This module provides:
//! - Normalization of heterogeneous workload objects into InferenceRequests
//! - Time-bounded deduplication of redelivered watch events
//! - The snapshot/stream watcher state machine over a pluggable cluster source
//! - Manifest parsing for offline collection
//! - NDJSON emission with optional HTTP forwarding

mod manifest;
mod normalize;
mod seen;
mod sink;
mod source;
mod watcher;


pub use manifest::requests_from_manifest;
pub use normalize::{to_inference_request, IntoObserved, ObservedObject};
pub use seen::{SeenCache, SeenKey, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
pub use sink::{forward_request, Emitter, EmitterConfig};
pub use source::{ClusterSource, KubeClusterSource, ListSnapshot, UpdateStream, WatchUpdate};
pub use watcher::{spawn_watchers, ClusterWatcher, WatchPhase, WatchStats, WatcherConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Object kinds the collector knows how to watch and normalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Deployment,
    Job,
    CronJob,
    Pod,
    StatefulSet,
    DaemonSet,
}

impl ObjectKind {
    /// Kinds watched when no filter is configured
    pub const DEFAULT: [ObjectKind; 3] = [ObjectKind::Deployment, ObjectKind::Job, ObjectKind::CronJob];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Job => "Job",
            ObjectKind::CronJob => "CronJob",
            ObjectKind::Pod => "Pod",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    /// Accepts kind names, plurals and kubectl short names, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(ObjectKind::Deployment),
            "job" | "jobs" => Ok(ObjectKind::Job),
            "cronjob" | "cronjobs" | "cj" => Ok(ObjectKind::CronJob),
            "pod" | "pods" | "po" => Ok(ObjectKind::Pod),
            "statefulset" | "statefulsets" | "sts" => Ok(ObjectKind::StatefulSet),
            "daemonset" | "daemonsets" | "ds" => Ok(ObjectKind::DaemonSet),
            other => Err(format!("unsupported kind: {}", other)),
        }
    }
}
