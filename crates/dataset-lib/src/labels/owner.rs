//! Pod → workload owner resolution
//!
//! Each strategy produces an [`OwnerMap`] for the query range once; series
//! are then resolved against it with [`OwnerMap::resolve`].
//!
//! - `metrics`: kube-state-metrics owner series from the metrics backend
//! - `api`: live Pods/ReplicaSets/Jobs from the Kubernetes API
//! - `auto`: `metrics`, falling back to `api` only when the metrics map is
//!   empty as a whole (no per-series mixing)

use super::prometheus::{MetricsSource, QueryRange, Series};
use super::series::{namespace_of, pod_of};
use crate::canonical::{canonicalize, controller_link, OwnerLink};
use crate::cluster::ClusterConnection;
use crate::error::LabelError;
use crate::models::Workload;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::Api;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_OWNER_QUERY: &str = "max by (namespace, pod, owner_kind, owner_name) (kube_pod_owner)";
pub const DEFAULT_JOB_OWNER_QUERY: &str =
    "max by (namespace, job_name, owner_kind, owner_name) (kube_job_owner)";

/// Resolution strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerResolution {
    Metrics,
    Api,
    #[default]
    Auto,
}

impl fmt::Display for OwnerResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerResolution::Metrics => "metrics",
            OwnerResolution::Api => "api",
            OwnerResolution::Auto => "auto",
        })
    }
}

impl FromStr for OwnerResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metrics" | "prom" | "prometheus" => Ok(OwnerResolution::Metrics),
            "api" | "k8s" => Ok(OwnerResolution::Api),
            "auto" => Ok(OwnerResolution::Auto),
            other => Err(format!("unknown owner source: {}", other)),
        }
    }
}

/// `(namespace, pod)` → canonical workload
#[derive(Debug, Clone, Default)]
pub struct OwnerMap {
    entries: HashMap<(String, String), Workload>,
}

impl OwnerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: impl Into<String>, pod: impl Into<String>, workload: Workload) {
        self.entries.insert((namespace.into(), pod.into()), workload);
    }

    pub fn resolve(&self, namespace: &str, pod: &str) -> Option<&Workload> {
        self.entries.get(&(namespace.to_string(), pod.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A strategy producing the owner map for a query range
#[async_trait]
pub trait OwnerSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn owner_map(&self, range: &QueryRange) -> Result<OwnerMap, LabelError>;
}

/// Owner mapping from `kube_pod_owner` (and `kube_job_owner` for CronJobs)
pub struct MetricsOwnerSource {
    source: Arc<dyn MetricsSource>,
    owner_query: String,
    job_owner_query: Option<String>,
}

impl MetricsOwnerSource {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            owner_query: DEFAULT_OWNER_QUERY.to_string(),
            job_owner_query: Some(DEFAULT_JOB_OWNER_QUERY.to_string()),
        }
    }

    pub fn with_owner_query(mut self, query: impl Into<String>) -> Self {
        self.owner_query = query.into();
        self
    }

    /// `None` disables Job → CronJob resolution
    pub fn with_job_owner_query(mut self, query: Option<String>) -> Self {
        self.job_owner_query = query;
        self
    }

    async fn job_owners(&self, range: &QueryRange) -> HashMap<(String, String), OwnerLink> {
        let Some(query) = &self.job_owner_query else {
            return HashMap::new();
        };
        match self.source.query_range(query, range).await {
            Ok(series) => series
                .iter()
                .filter_map(|s| {
                    let ns = namespace_of(s)?;
                    let job = s.label("job_name")?;
                    let link = owner_link_of(s)?;
                    Some(((ns.to_string(), job.to_string()), link))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Job owner series unavailable, CronJob pods resolve to their Job");
                HashMap::new()
            }
        }
    }
}

fn owner_link_of(series: &Series) -> Option<OwnerLink> {
    let kind = series.label("owner_kind")?;
    let name = series.label("owner_name")?;
    Some(OwnerLink::new(kind, name))
}

#[async_trait]
impl OwnerSource for MetricsOwnerSource {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn owner_map(&self, range: &QueryRange) -> Result<OwnerMap, LabelError> {
        let series = self.source.query_range(&self.owner_query, range).await?;
        let job_owners = self.job_owners(range).await;

        let mut map = OwnerMap::new();
        for s in &series {
            let (Some(ns), Some(pod)) = (namespace_of(s), pod_of(s)) else {
                continue;
            };
            let mut chain = Vec::new();
            if let Some(link) = owner_link_of(s) {
                if link.kind == "Job" {
                    let parent = job_owners.get(&(ns.to_string(), link.name.clone())).cloned();
                    chain.push(link);
                    chain.extend(parent);
                } else {
                    chain.push(link);
                }
            }
            map.insert(ns, pod, canonicalize("Pod", pod, &chain));
        }

        debug!(series = series.len(), pods = map.len(), "Built owner map from metrics");
        Ok(map)
    }
}

/// Owner mapping from the live cluster
///
/// Only pods that still exist resolve; pods that finished before the query
/// are resolution misses.
pub struct ApiOwnerSource {
    connection: ClusterConnection,
    namespaces: Vec<String>,
}

impl ApiOwnerSource {
    pub fn new(connection: ClusterConnection) -> Self {
        Self {
            connection,
            namespaces: Vec::new(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }
}

#[async_trait]
impl OwnerSource for ApiOwnerSource {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn owner_map(&self, _range: &QueryRange) -> Result<OwnerMap, LabelError> {
        let client = self.connection.client().await.map_err(api_error)?;
        let params = ListParams::default();

        let pods = Api::<Pod>::all(client.clone())
            .list(&params)
            .await
            .map_err(api_error)?;
        let replica_sets = Api::<ReplicaSet>::all(client.clone())
            .list(&params)
            .await
            .map_err(api_error)?;
        let jobs = Api::<Job>::all(client)
            .list(&params)
            .await
            .map_err(api_error)?;

        let parents: HashMap<(String, String, String), OwnerLink> = replica_sets
            .items
            .iter()
            .map(|rs| ("ReplicaSet", &rs.metadata))
            .chain(jobs.items.iter().map(|job| ("Job", &job.metadata)))
            .filter_map(|(kind, meta)| {
                let link = controller_link(meta)?;
                let ns = meta.namespace.clone()?;
                let name = meta.name.clone()?;
                Some(((ns, kind.to_string(), name), link))
            })
            .collect();

        let mut map = OwnerMap::new();
        for pod in &pods.items {
            let (Some(ns), Some(name)) = (&pod.metadata.namespace, &pod.metadata.name) else {
                continue;
            };
            if !self.namespaces.is_empty() && !self.namespaces.contains(ns) {
                continue;
            }
            let chain = owner_chain(ns, controller_link(&pod.metadata), &parents);
            map.insert(ns.as_str(), name.as_str(), canonicalize("Pod", name, &chain));
        }

        debug!(pods = map.len(), "Built owner map from the Kubernetes API");
        Ok(map)
    }
}

fn api_error(e: impl fmt::Display) -> LabelError {
    LabelError::OwnerSource(format!("kubernetes api: {}", e))
}

/// Expand a pod's direct owner through its ReplicaSet/Job parent
fn owner_chain(
    namespace: &str,
    direct: Option<OwnerLink>,
    parents: &HashMap<(String, String, String), OwnerLink>,
) -> Vec<OwnerLink> {
    let Some(direct) = direct else {
        return Vec::new();
    };
    let parent = parents
        .get(&(namespace.to_string(), direct.kind.clone(), direct.name.clone()))
        .cloned();
    let mut chain = vec![direct];
    chain.extend(parent);
    chain
}

/// `metrics`, falling back to a second source when the first yields nothing
pub struct AutoOwnerSource {
    primary: Box<dyn OwnerSource>,
    fallback: Box<dyn OwnerSource>,
}

impl AutoOwnerSource {
    pub fn new(primary: Box<dyn OwnerSource>, fallback: Box<dyn OwnerSource>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl OwnerSource for AutoOwnerSource {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn owner_map(&self, range: &QueryRange) -> Result<OwnerMap, LabelError> {
        match self.primary.owner_map(range).await {
            Ok(map) if !map.is_empty() => return Ok(map),
            Ok(_) => info!(
                primary = self.primary.name(),
                fallback = self.fallback.name(),
                "Owner map empty, falling back"
            ),
            Err(e) => warn!(
                primary = self.primary.name(),
                fallback = self.fallback.name(),
                error = %e,
                "Owner source failed, falling back"
            ),
        }
        self.fallback.owner_map(range).await
    }
}

/// Build the owner source for a resolution strategy
///
/// `owner_query` replaces the default `kube_pod_owner` query.
pub fn owner_source(
    resolution: OwnerResolution,
    metrics: Arc<dyn MetricsSource>,
    connection: ClusterConnection,
    namespaces: Vec<String>,
    owner_query: Option<String>,
) -> Box<dyn OwnerSource> {
    let from_metrics = || -> Box<dyn OwnerSource> {
        let source = MetricsOwnerSource::new(metrics.clone());
        Box::new(match &owner_query {
            Some(query) => source.with_owner_query(query.clone()),
            None => source,
        })
    };
    let from_api = || -> Box<dyn OwnerSource> {
        Box::new(ApiOwnerSource::new(connection.clone()).with_namespaces(namespaces.clone()))
    };

    match resolution {
        OwnerResolution::Metrics => from_metrics(),
        OwnerResolution::Api => from_api(),
        OwnerResolution::Auto => Box::new(AutoOwnerSource::new(from_metrics(), from_api())),
    }
}
