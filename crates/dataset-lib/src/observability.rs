//! Observability infrastructure for the dataset pipeline
//!
//! Provides:
//! - Prometheus metrics (watch events, emission, dedup, restarts, label queries)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for metrics-backend query latency (in seconds)
const QUERY_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    watch_events: IntCounterVec,
    watch_restarts: IntCounterVec,
    watch_phase: IntGaugeVec,
    requests_emitted: IntCounter,
    duplicates_suppressed: IntCounter,
    parse_errors: IntCounter,
    forward_failures: IntCounter,
    query_latency_seconds: Histogram,
    owner_resolution_misses: IntCounter,
    label_rows: IntCounterVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            watch_events: register_int_counter_vec!(
                "workload_collector_watch_events_total",
                "Watch events received, by object kind",
                &["kind"]
            )
            .expect("Failed to register watch_events"),

            watch_restarts: register_int_counter_vec!(
                "workload_collector_watch_restarts_total",
                "Watch re-establishments, by object kind and reason",
                &["kind", "reason"]
            )
            .expect("Failed to register watch_restarts"),

            watch_phase: register_int_gauge_vec!(
                "workload_collector_watch_phase",
                "Current watcher phase (0=init 1=snapshot 2=stream 3=retry 4=terminated)",
                &["kind"]
            )
            .expect("Failed to register watch_phase"),

            requests_emitted: register_int_counter!(
                "workload_collector_requests_emitted_total",
                "InferenceRequests written to the output"
            )
            .expect("Failed to register requests_emitted"),

            duplicates_suppressed: register_int_counter!(
                "workload_collector_duplicates_suppressed_total",
                "Watch events suppressed by the dedup cache"
            )
            .expect("Failed to register duplicates_suppressed"),

            parse_errors: register_int_counter!(
                "workload_collector_parse_errors_total",
                "Objects skipped because they could not be normalized"
            )
            .expect("Failed to register parse_errors"),

            forward_failures: register_int_counter!(
                "workload_collector_forward_failures_total",
                "Failed or rejected HTTP forwards of InferenceRequests"
            )
            .expect("Failed to register forward_failures"),

            query_latency_seconds: register_histogram!(
                "power_labels_query_latency_seconds",
                "Latency of range queries against the metrics backend",
                QUERY_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register query_latency_seconds"),

            owner_resolution_misses: register_int_counter!(
                "power_labels_owner_resolution_misses_total",
                "Energy series dropped because no owning workload was found"
            )
            .expect("Failed to register owner_resolution_misses"),

            label_rows: register_int_counter_vec!(
                "power_labels_rows_total",
                "Label rows produced, by aggregation mode",
                &["mode"]
            )
            .expect("Failed to register label_rows"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn inc_watch_events(&self, kind: &str) {
        self.inner().watch_events.with_label_values(&[kind]).inc();
    }

    /// `reason` is `retry` or `resync`
    pub fn inc_watch_restarts(&self, kind: &str, reason: &str) {
        self.inner()
            .watch_restarts
            .with_label_values(&[kind, reason])
            .inc();
    }

    pub fn set_watch_phase(&self, kind: &str, phase: i64) {
        self.inner().watch_phase.with_label_values(&[kind]).set(phase);
    }

    pub fn inc_requests_emitted(&self) {
        self.inner().requests_emitted.inc();
    }

    pub fn inc_duplicates_suppressed(&self) {
        self.inner().duplicates_suppressed.inc();
    }

    pub fn inc_parse_errors(&self) {
        self.inner().parse_errors.inc();
    }

    pub fn inc_forward_failures(&self) {
        self.inner().forward_failures.inc();
    }

    pub fn observe_query_latency(&self, duration_secs: f64) {
        self.inner().query_latency_seconds.observe(duration_secs);
    }

    pub fn inc_owner_resolution_misses(&self, count: u64) {
        self.inner().owner_resolution_misses.inc_by(count);
    }

    pub fn inc_label_rows(&self, mode: &str, count: u64) {
        self.inner()
            .label_rows
            .with_label_values(&[mode])
            .inc_by(count);
    }
}

/// Structured logger for pipeline events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str, kinds: &[String]) {
        info!(
            event = "collector_started",
            component = %self.component,
            version = %version,
            kinds = ?kinds,
            "Workload collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            component = %self.component,
            reason = %reason,
            "Workload collector shutting down"
        );
    }

    /// Log a watcher phase transition
    pub fn log_phase_change(&self, kind: &str, from: &str, to: &str) {
        info!(
            event = "watch_phase_changed",
            component = %self.component,
            kind = %kind,
            from = %from,
            to = %to,
            "Watcher phase changed"
        );
    }

    pub fn log_resync(&self, kind: &str, resource_version: Option<&str>) {
        warn!(
            event = "watch_resync",
            component = %self.component,
            kind = %kind,
            resource_version = ?resource_version,
            "resourceVersion expired, re-listing"
        );
    }

    pub fn log_retry(&self, kind: &str, attempt: u32, backoff_ms: u64, error: &str) {
        warn!(
            event = "watch_retry",
            component = %self.component,
            kind = %kind,
            attempt = attempt,
            backoff_ms = backoff_ms,
            error = %error,
            "Watch connection failed, backing off"
        );
    }

    pub fn log_label_extraction(&self, mode: &str, rows: usize, series: usize, misses: usize) {
        if misses > 0 {
            warn!(
                event = "labels_extracted",
                component = %self.component,
                mode = %mode,
                rows = rows,
                series = series,
                resolution_misses = misses,
                "Extracted power labels with unresolved series"
            );
        } else {
            info!(
                event = "labels_extracted",
                component = %self.component,
                mode = %mode,
                rows = rows,
                series = series,
                "Extracted power labels"
            );
        }
    }

    pub fn log_join(&self, status: &str, rows: usize, feature_keys: usize, label_keys: usize) {
        info!(
            event = "dataset_joined",
            component = %self.component,
            status = %status,
            rows = rows,
            feature_keys = feature_keys,
            label_keys = label_keys,
            "Joined features with labels"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_handles_share_registry() {
        let metrics = PipelineMetrics::new();
        let other = metrics.clone();

        metrics.inc_watch_events("Deployment");
        metrics.inc_watch_restarts("Deployment", "resync");
        metrics.set_watch_phase("Job", 2);
        other.inc_requests_emitted();
        other.observe_query_latency(0.2);
        other.inc_owner_resolution_misses(3);
        other.inc_label_rows("window", 10);

        let encoded = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect::<Vec<_>>();
        assert!(encoded.contains(&"workload_collector_watch_events_total".to_string()));
        assert!(encoded.contains(&"power_labels_rows_total".to_string()));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("watcher");
        assert_eq!(logger.component, "watcher");
    }
}
