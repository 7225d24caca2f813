//! Range queries against a Prometheus-compatible metrics backend

use crate::error::LabelError;
use crate::observability::PipelineMetrics;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Query window `[start, end]` sampled every `step`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl QueryRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Result<Self, LabelError> {
        if end <= start {
            return Err(LabelError::InvalidRange(format!(
                "end {} is not after start {}",
                end, start
            )));
        }
        if step.is_zero() {
            return Err(LabelError::InvalidRange("step must be positive".to_string()));
        }
        Ok(Self { start, end, step })
    }

    /// Parse user-supplied bounds (RFC 3339 or unix seconds) and step
    pub fn parse(start: &str, end: &str, step: &str) -> Result<Self, LabelError> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?, parse_step(step)?)
    }
}

/// RFC 3339 (`2024-05-01T12:00:00Z`) or unix seconds (`1714564800`, `1714564800.5`)
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LabelError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let invalid = || LabelError::InvalidRange(format!("unrecognized timestamp: {:?}", value));
    let secs: f64 = value.parse().map_err(|_| invalid())?;
    if !secs.is_finite() {
        return Err(invalid());
    }
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
}

/// Prometheus-style duration: `60s`, `5m`, `1h30m`, `500ms`, or bare seconds
pub fn parse_step(value: &str) -> Result<Duration, LabelError> {
    let value = value.trim();
    let invalid = || LabelError::InvalidRange(format!("unrecognized step: {:?}", value));

    if let Ok(secs) = value.parse::<f64>() {
        if secs > 0.0 {
            return Duration::try_from_secs_f64(secs).map_err(|_| invalid());
        }
        return Err(invalid());
    }

    let mut total_ms: u64 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit_ms: u64 = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            _ => return Err(invalid()),
        };
        total_ms = amount
            .checked_mul(unit_ms)
            .and_then(|part| total_ms.checked_add(part))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }

    if total_ms == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_millis(total_ms))
}

/// One time series: its label set and `(unix seconds, value)` samples
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<(f64, f64)>,
}

impl Series {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// A source of range-queried time series
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query_range(&self, query: &str, range: &QueryRange) -> Result<Vec<Series>, LabelError>;
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrometheusOptions {
    /// Per-request timeout
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub retry: RetryPolicy,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<MatrixData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixData {
    #[serde(default)]
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// HTTP client for `/api/v1/query_range`
pub struct PrometheusClient {
    client: reqwest::Client,
    endpoint: Url,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
}

impl PrometheusClient {
    pub fn new(base_url: &str) -> Result<Self, LabelError> {
        Self::with_options(base_url, PrometheusOptions::default())
    }

    pub fn with_options(base_url: &str, options: PrometheusOptions) -> Result<Self, LabelError> {
        // Keep any path prefix (`http://host/prometheus`) when joining
        let mut base = Url::parse(base_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("api/v1/query_range")?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|source| LabelError::Connection {
                attempts: 0,
                source,
            })?;

        Ok(Self {
            client,
            endpoint,
            retry: options.retry,
            metrics: PipelineMetrics::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn query_once(&self, query: &str, range: &QueryRange) -> Result<Vec<Series>, LabelError> {
        let start = format_unix(range.start);
        let end = format_unix(range.end);
        let step = range.step.as_secs_f64().to_string();

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()
            .await
            .map_err(|source| LabelError::Connection {
                attempts: 1,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| LabelError::Connection {
                attempts: 1,
                source,
            })?;

        // Prometheus reports query errors as JSON with 400/422/503
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(api) if api.status == "success" && status.is_success() => Ok(api
                .data
                .map(|d| d.result)
                .unwrap_or_default()
                .into_iter()
                .map(into_series)
                .collect()),
            Some(api) if api.status == "error" && !is_transient_status(status.as_u16()) => {
                Err(LabelError::Query {
                    error_type: api.error_type.unwrap_or_else(|| "unknown".to_string()),
                    message: api.error.unwrap_or_default(),
                })
            }
            _ => Err(LabelError::Http {
                status: status.as_u16(),
                body: truncate(&body, 512),
            }),
        }
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query_range(&self, query: &str, range: &QueryRange) -> Result<Vec<Series>, LabelError> {
        let mut attempt = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.query_once(query, range).await;
            self.metrics
                .observe_query_latency(started.elapsed().as_secs_f64());

            match result {
                Ok(series) => {
                    debug!(query = %query, series = series.len(), attempt, "Range query complete");
                    return Ok(series);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        query = %query,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient metrics backend failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.retry.max_backoff);
                }
                Err(LabelError::Connection { source, .. }) => {
                    return Err(LabelError::Connection {
                        attempts: attempt,
                        source,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn into_series(raw: MatrixSeries) -> Series {
    let samples = raw
        .values
        .into_iter()
        .filter_map(|(ts, value)| value.parse::<f64>().ok().map(|v| (ts, v)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    Series {
        labels: raw.metric,
        samples,
    }
}

fn format_unix(ts: DateTime<Utc>) -> String {
    format!("{:.3}", ts.timestamp_millis() as f64 / 1000.0)
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
