//! Power dataset library
//!
//! This crate provides the core functionality for:
//! - Watching cluster workloads and normalizing them into InferenceRequests
//! - Canonicalizing pods and controllers to their owning workload
//! - Extracting energy labels from a Prometheus-compatible backend
//! - Joining feature and label tables into a training table
//! - Health checks and observability

pub mod canonical;
pub mod cluster;
pub mod collector;
pub mod dataset;
pub mod error;
pub mod health;
pub mod labels;
pub mod models;
pub mod observability;
pub mod quantity;

pub use canonical::{canonicalize, canonicalize_loose, OwnerLink};
pub use cluster::ClusterConnection;
pub use dataset::{DatasetJoiner, JoinReport, JoinStatus};
pub use error::{LabelError, ParseError, TableError, WatchError};
pub use health::{
    ComponentHealth, HealthRegistry, HealthResponse, HealthStatus, ReadinessResponse,
    WatcherHealth,
};
pub use labels::{LabelAggregator, OwnerResolution, PrometheusClient, QueryRange};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
