//! Error taxonomy for the observation-to-label pipeline

use std::time::Duration;
use thiserror::Error;

/// Malformed input: resource quantities, cluster objects, manifests
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid resource quantity: {0:?}")]
    InvalidQuantity(String),

    #[error("malformed {kind} object: {reason}")]
    MalformedObject { kind: String, reason: String },

    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("invalid object body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Watch-stream failures
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    /// The server no longer has history for the requested resourceVersion
    #[error("resourceVersion {0} expired")]
    Expired(String),

    #[error("watch stream failed: {0}")]
    Stream(String),

    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("kubernetes client configuration failed: {0}")]
    Config(String),
}

impl WatchError {
    /// Whether this error means the resourceVersion is too old to resume from
    pub fn is_expired(&self) -> bool {
        match self {
            WatchError::Expired(_) => true,
            WatchError::Api(kube::Error::Api(resp)) => resp.code == 410,
            _ => false,
        }
    }
}

/// Columnar table I/O failures
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table io: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("ndjson: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("column {column} has unsupported type {data_type}")]
    ColumnType { column: String, data_type: String },
}

/// Label extraction failures
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("metrics backend unreachable after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("metrics backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("query failed ({error_type}): {message}")]
    Query { error_type: String, message: String },

    #[error("no samples returned for query {query:?} over the requested range")]
    EmptyResult { query: String },

    #[error("label extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("owner mapping unavailable: {0}")]
    OwnerSource(String),

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("invalid metrics backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Table(#[from] TableError),
}

impl LabelError {
    /// Transient failures are retried with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            LabelError::Http { status, .. } => *status == 429 || *status >= 500,
            LabelError::Connection { .. } => true,
            _ => false,
        }
    }
}
