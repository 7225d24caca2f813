//! Power label extraction
//!
//! This module provides:
//! - Range queries against a Prometheus-compatible backend, with retry
//! - Exporter-agnostic (namespace, pod) identity for series
//! - Pod → workload owner resolution (`metrics`, `api`, `auto`)
//! - Window and job label aggregation over cumulative energy counters

mod aggregate;
mod owner;
mod prometheus;
mod series;


pub use aggregate::{
    step_deltas, LabelAggregator, LabelQueries, LabelReport, LabelStats, DEFAULT_ENERGY_QUERY,
    DEFAULT_POWER_QUERY,
};
pub use owner::{
    owner_source, ApiOwnerSource, AutoOwnerSource, MetricsOwnerSource, OwnerMap, OwnerResolution,
    OwnerSource, DEFAULT_JOB_OWNER_QUERY, DEFAULT_OWNER_QUERY,
};
pub use prometheus::{
    parse_step, parse_timestamp, MetricsSource, PrometheusClient, PrometheusOptions, QueryRange,
    RetryPolicy, Series,
};
pub use series::{namespace_of, pod_of};
