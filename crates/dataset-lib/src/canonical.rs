//! Workload canonicalization
//!
//! Maps an observed object (Pod, ReplicaSet, Job, ...) to the top-level
//! controller that owns it. The owner chain is passed in explicitly, so
//! the same pure function serves the watcher, the owner resolvers and the
//! joiner.

use crate::models::{Workload, WorkloadKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;
use std::sync::OnceLock;

/// One hop in an owner-reference chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLink {
    pub kind: String,
    pub name: String,
}

impl OwnerLink {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// The controlling owner reference of an object, or its first one if none
/// is marked as controller
pub fn controller_link(meta: &ObjectMeta) -> Option<OwnerLink> {
    let refs = meta.owner_references.as_deref().unwrap_or_default();
    refs.iter()
        .find(|r| r.controller == Some(true))
        .or_else(|| refs.first())
        .map(|r| OwnerLink::new(r.kind.clone(), r.name.clone()))
}

/// Built-in controllers an owner chain is followed through
const CONTROLLER_KINDS: &[&str] = &[
    "ReplicaSet",
    "Deployment",
    "Job",
    "CronJob",
    "StatefulSet",
    "DaemonSet",
];

/// `<deployment>-<pod-template-hash>`
fn replicaset_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<base>.+)-(?P<hash>[0-9a-z]{5,10})$").unwrap())
}

/// `<deployment>-<pod-template-hash>-<5 random chars>`
fn deployment_pod_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>.+)-(?P<hash>[0-9a-z]{6,10})-[0-9a-z]{5}$").unwrap()
    })
}

/// Recover a Deployment name from a ReplicaSet name
pub fn strip_replicaset_hash(name: &str) -> &str {
    replicaset_pattern()
        .captures(name)
        .and_then(|caps| caps.name("base"))
        .map(|m| m.as_str())
        .unwrap_or(name)
}

/// Resolve the canonical workload for `kind/name` given its owner chain
///
/// `owners` is ordered nearest first: for a Pod that is
/// `[ReplicaSet, Deployment]` when the full chain is known, or just
/// `[ReplicaSet]` when only the pod's own references are available.
/// The walk stops at the first owner that is not a built-in controller
/// (a Node for mirror pods, custom resources managing Deployments), so both
/// the watcher and the label side land on the same identity.
pub fn canonicalize(kind: &str, name: &str, owners: &[OwnerLink]) -> Workload {
    let mut current_kind = kind;
    let mut current_name = name;

    for link in owners {
        if !CONTROLLER_KINDS.contains(&link.kind.as_str()) || link.name.is_empty() {
            break;
        }
        current_kind = link.kind.as_str();
        current_name = link.name.as_str();
    }

    terminal_workload(current_kind, current_name)
}

fn terminal_workload(kind: &str, name: &str) -> Workload {
    let kind = kind.trim();
    let name = name.trim();
    match kind {
        "ReplicaSet" => Workload::new(WorkloadKind::Deployment, strip_replicaset_hash(name)),
        "" | "<none>" => Workload::new(WorkloadKind::Pod, name),
        other => Workload::new(other.parse().unwrap_or(WorkloadKind::Pod), name),
    }
}

/// Canonicalize a bare `(kind, name)` pair with no owner information
///
/// Pod names that follow the Deployment naming scheme are mapped back to
/// their Deployment. Used where only flattened keys survive, e.g. when
/// joining tables produced by different tools.
pub fn canonicalize_loose(kind: &str, name: &str) -> Workload {
    let kind = kind.trim();
    let name = name.trim();
    if kind == "Pod" {
        if let Some(caps) = deployment_pod_pattern().captures(name) {
            let has_digit = caps["hash"].chars().any(|c| c.is_ascii_digit());
            if has_digit {
                return Workload::new(WorkloadKind::Deployment, &caps["base"]);
            }
        }
        return Workload::new(WorkloadKind::Pod, name);
    }
    canonicalize(kind, name, &[])
}
