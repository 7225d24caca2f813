//! Energy label aggregation
//!
//! Energy counters are differenced per series (negative steps clamped to
//! zero), series are summed per pod, pods are resolved to workloads, and the
//! result is shaped into window rows or job rows.

use super::owner::OwnerSource;
use super::prometheus::{MetricsSource, QueryRange, Series};
use super::series::{namespace_of, pod_of};
use crate::error::LabelError;
use crate::models::{AggregationMode, JobRow, LabelTable, WindowRow, Workload};
use crate::observability::{PipelineMetrics, StructuredLogger};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ENERGY_QUERY: &str =
    "sum by (container_namespace, pod_name) (kepler_container_joules_total)";
pub const DEFAULT_POWER_QUERY: &str =
    "sum by (container_namespace, pod_name) (kepler_container_power_watt)";

/// `(namespace, pod)`
type PodKey = (String, String);

/// Millisecond timestamp → value
type Timeline = BTreeMap<i64, f64>;

#[derive(Debug, Clone)]
pub struct LabelQueries {
    /// Cumulative energy counter, joules
    pub energy: String,
    /// Instantaneous power, watts; `None` skips the power query
    pub power: Option<String>,
}

impl Default for LabelQueries {
    fn default() -> Self {
        Self {
            energy: DEFAULT_ENERGY_QUERY.to_string(),
            power: Some(DEFAULT_POWER_QUERY.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelStats {
    pub energy_series: usize,
    pub power_series: usize,
    /// Series without a namespace/pod identity (node or system level)
    pub unidentified_series: usize,
    pub pods: usize,
    pub resolution_misses: usize,
    pub rows: usize,
    pub owner_source: String,
}

#[derive(Debug, Clone)]
pub struct LabelReport {
    pub table: LabelTable,
    pub stats: LabelStats,
}

/// Step deltas of one counter series, clamped at zero
///
/// `samples` must be sorted by timestamp. The first sample has no
/// predecessor and yields no step.
pub fn step_deltas(samples: &[(f64, f64)]) -> Vec<(f64, f64)> {
    samples
        .windows(2)
        .map(|pair| (pair[1].0, (pair[1].1 - pair[0].1).max(0.0)))
        .collect()
}

fn ts_key(ts: f64) -> i64 {
    (ts * 1000.0).round() as i64
}

pub struct LabelAggregator {
    metrics: Arc<dyn MetricsSource>,
    owners: Arc<dyn OwnerSource>,
    queries: LabelQueries,
    namespaces: Vec<String>,
    timeout: Option<Duration>,
    pipeline_metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl LabelAggregator {
    pub fn new(metrics: Arc<dyn MetricsSource>, owners: Arc<dyn OwnerSource>) -> Self {
        Self {
            metrics,
            owners,
            queries: LabelQueries::default(),
            namespaces: Vec::new(),
            timeout: None,
            pipeline_metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("labels"),
        }
    }

    pub fn with_queries(mut self, queries: LabelQueries) -> Self {
        self.queries = queries;
        self
    }

    /// Restrict output to these namespaces; empty means all
    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Abort the whole extraction after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn extract(
        &self,
        range: &QueryRange,
        mode: AggregationMode,
    ) -> Result<LabelReport, LabelError> {
        let report = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.extract_unbounded(range, mode))
                .await
                .map_err(|_| LabelError::Timeout(limit))??,
            None => self.extract_unbounded(range, mode).await?,
        };

        let mode_name = mode.to_string();
        self.pipeline_metrics
            .inc_label_rows(&mode_name, report.stats.rows as u64);
        self.pipeline_metrics
            .inc_owner_resolution_misses(report.stats.resolution_misses as u64);
        self.logger.log_label_extraction(
            &mode_name,
            report.stats.rows,
            report.stats.energy_series,
            report.stats.resolution_misses,
        );
        Ok(report)
    }

    async fn extract_unbounded(
        &self,
        range: &QueryRange,
        mode: AggregationMode,
    ) -> Result<LabelReport, LabelError> {
        let power_query = self.queries.power.as_deref();
        let (energy, power) = tokio::join!(
            self.metrics.query_range(&self.queries.energy, range),
            async {
                match power_query {
                    Some(query) => self.metrics.query_range(query, range).await.map(Some),
                    None => Ok(None),
                }
            }
        );

        let energy = energy?;
        let mut stats = LabelStats {
            energy_series: energy.len(),
            owner_source: self.owners.name().to_string(),
            ..Default::default()
        };

        let steps = self.energy_steps(&energy, &mut stats);
        if steps.is_empty() {
            return Err(LabelError::EmptyResult {
                query: self.queries.energy.clone(),
            });
        }
        stats.pods = steps.len();

        let power = match power {
            Ok(Some(series)) => {
                stats.power_series = series.len();
                self.power_timelines(&series)
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "Power query failed, avg_power_w will be empty");
                BTreeMap::new()
            }
        };

        let owners = self.owners.owner_map(range).await?;
        if owners.is_empty() {
            return Err(LabelError::OwnerSource(format!(
                "{} owner source returned no pods",
                self.owners.name()
            )));
        }

        let mut resolved: BTreeMap<(String, Workload), BTreeMap<String, Timeline>> = BTreeMap::new();
        for ((namespace, pod), deltas) in steps {
            match owners.resolve(&namespace, &pod) {
                Some(workload) => {
                    resolved
                        .entry((namespace, workload.clone()))
                        .or_default()
                        .insert(pod, deltas);
                }
                None => {
                    debug!(namespace = %namespace, pod = %pod, "No owner for series, dropping");
                    stats.resolution_misses += 1;
                }
            }
        }

        let table = match mode {
            AggregationMode::Window => LabelTable::Window(window_rows(&resolved, &power)),
            AggregationMode::Job => LabelTable::Job(job_rows(&resolved, &power)),
        };
        stats.rows = table.len();

        Ok(LabelReport { table, stats })
    }

    fn namespace_allowed(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|ns| ns == namespace)
    }

    /// Per-pod step deltas; pods whose series have a single sample are kept
    /// with an empty timeline
    fn energy_steps(&self, energy: &[Series], stats: &mut LabelStats) -> BTreeMap<PodKey, Timeline> {
        let mut steps: BTreeMap<PodKey, Timeline> = BTreeMap::new();

        for series in energy {
            let (Some(namespace), Some(pod)) = (namespace_of(series), pod_of(series)) else {
                stats.unidentified_series += 1;
                continue;
            };
            if !self.namespace_allowed(namespace) || series.samples.is_empty() {
                continue;
            }

            let mut samples = series.samples.clone();
            samples.sort_by(|a, b| a.0.total_cmp(&b.0));

            let timeline = steps
                .entry((namespace.to_string(), pod.to_string()))
                .or_default();
            for (ts, delta) in step_deltas(&samples) {
                *timeline.entry(ts_key(ts)).or_insert(0.0) += delta;
            }
        }

        steps
    }

    fn power_timelines(&self, power: &[Series]) -> BTreeMap<PodKey, Timeline> {
        let mut timelines: BTreeMap<PodKey, Timeline> = BTreeMap::new();
        for series in power {
            let (Some(namespace), Some(pod)) = (namespace_of(series), pod_of(series)) else {
                continue;
            };
            let timeline = timelines
                .entry((namespace.to_string(), pod.to_string()))
                .or_default();
            for &(ts, watts) in &series.samples {
                *timeline.entry(ts_key(ts)).or_insert(0.0) += watts;
            }
        }
        timelines
    }
}

fn power_at(
    power: &BTreeMap<PodKey, Timeline>,
    namespace: &str,
    pod: &str,
    ts: i64,
) -> Option<f64> {
    power
        .get(&(namespace.to_string(), pod.to_string()))
        .and_then(|timeline| timeline.get(&ts))
        .copied()
}

fn window_rows(
    resolved: &BTreeMap<(String, Workload), BTreeMap<String, Timeline>>,
    power: &BTreeMap<PodKey, Timeline>,
) -> Vec<WindowRow> {
    let mut rows = Vec::new();
    for ((namespace, workload), pods) in resolved {
        for (pod, deltas) in pods {
            for (&ts, &step) in deltas {
                rows.push(WindowRow {
                    namespace: namespace.clone(),
                    workload_kind: workload.kind.clone(),
                    workload_name: workload.name.clone(),
                    spec_hash: None,
                    pod_uid: pod.clone(),
                    timestamp: ts as f64 / 1000.0,
                    avg_power_w: power_at(power, namespace, pod, ts),
                    energy_step_j: step,
                });
            }
        }
    }
    rows
}

fn job_rows(
    resolved: &BTreeMap<(String, Workload), BTreeMap<String, Timeline>>,
    power: &BTreeMap<PodKey, Timeline>,
) -> Vec<JobRow> {
    resolved
        .iter()
        .map(|((namespace, workload), pods)| {
            let total_energy_j: f64 = pods.values().flat_map(|deltas| deltas.values()).sum();

            // Power averaged over the same steps the energy covers
            let watts: Vec<f64> = pods
                .iter()
                .flat_map(|(pod, deltas)| {
                    deltas
                        .keys()
                        .filter_map(move |&ts| power_at(power, namespace, pod, ts))
                })
                .collect();
            let avg_power_w = if watts.is_empty() {
                None
            } else {
                Some(watts.iter().sum::<f64>() / watts.len() as f64)
            };

            let pod_uid = match pods.keys().collect::<Vec<_>>().as_slice() {
                [only] => Some((*only).clone()),
                _ => None,
            };

            JobRow {
                namespace: namespace.clone(),
                workload_kind: workload.kind.clone(),
                workload_name: workload.name.clone(),
                spec_hash: None,
                pod_uid,
                pod_count: pods.len() as u32,
                avg_power_w,
                total_energy_j,
            }
        })
        .collect()
}
