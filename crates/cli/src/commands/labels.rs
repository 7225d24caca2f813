//! `labels`: energy label extraction

use anyhow::{Context, Result};
use clap::Args;
use dataset_lib::cluster::ClusterConnection;
use dataset_lib::dataset::write_labels;
use dataset_lib::labels::{
    owner_source, parse_step, parse_timestamp, LabelAggregator, LabelQueries, MetricsSource,
    OwnerResolution, OwnerSource, PrometheusClient, PrometheusOptions, QueryRange,
    DEFAULT_ENERGY_QUERY, DEFAULT_POWER_QUERY,
};
use dataset_lib::AggregationMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::output::{format_energy, print_json, print_success, print_warning, OutputFormat};

const DEFAULT_STEP: &str = "60s";
const DEFAULT_LOOKBACK_SECS: i64 = 3600;

#[derive(Debug, Args)]
pub struct LabelsArgs {
    /// Metrics backend base URL
    #[arg(long, env = "PDS_PROMETHEUS_URL")]
    pub prom_url: Option<String>,

    /// Owner resolution: auto, metrics or api
    #[arg(long)]
    pub owner_source: Option<OwnerResolution>,

    /// Aggregation mode: window or job
    #[arg(long, default_value = "window")]
    pub mode: AggregationMode,

    /// Range start (RFC3339 or unix seconds); defaults to one hour before end
    #[arg(long)]
    pub start: Option<String>,

    /// Range end (RFC3339 or unix seconds); defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// Query step, e.g. 60s, 5m
    #[arg(long)]
    pub step: Option<String>,

    /// Output table (.parquet, .ndjson or .jsonl)
    #[arg(long, short, default_value = "labels.parquet")]
    pub out: PathBuf,

    /// Namespaces to keep (comma separated or repeated)
    #[arg(long = "namespace", short = 'n', value_delimiter = ',')]
    pub namespaces: Vec<String>,

    /// Abort extraction after this many seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Skip TLS verification for the metrics backend and the Kubernetes API
    #[arg(long)]
    pub insecure: bool,

    /// Cumulative energy counter query
    #[arg(long, default_value = DEFAULT_ENERGY_QUERY)]
    pub energy_query: String,

    /// Instantaneous power query
    #[arg(long, default_value = DEFAULT_POWER_QUERY)]
    pub power_query: String,

    /// Do not query power; avg_power_w stays empty
    #[arg(long)]
    pub no_power: bool,

    /// Pod owner query for metrics-based resolution
    #[arg(long)]
    pub owner_query: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Extra CA bundle for the Kubernetes API
    #[arg(long, env = "K8S_CA_FILE")]
    pub ca_file: Option<PathBuf>,
}

impl LabelsArgs {
    fn range(&self, config: &Config) -> Result<QueryRange> {
        let end = match &self.end {
            Some(end) => parse_timestamp(end)?,
            None => chrono::Utc::now(),
        };
        let start = match &self.start {
            Some(start) => parse_timestamp(start)?,
            None => end - chrono::Duration::seconds(DEFAULT_LOOKBACK_SECS),
        };
        let step = self
            .step
            .as_deref()
            .or(config.step.as_deref())
            .unwrap_or(DEFAULT_STEP);
        Ok(QueryRange::new(start, end, parse_step(step)?)?)
    }

    fn resolution(&self, config: &Config) -> Result<OwnerResolution> {
        match (self.owner_source, &config.owner_source) {
            (Some(resolution), _) => Ok(resolution),
            (None, Some(configured)) => configured
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid owner_source in config file"),
            (None, None) => Ok(OwnerResolution::default()),
        }
    }
}

pub async fn run(args: LabelsArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let prom_url = args
        .prom_url
        .clone()
        .or_else(|| config.prometheus_url.clone())
        .context("No metrics backend configured; pass --prom-url or set PDS_PROMETHEUS_URL")?;
    let range = args.range(config)?;
    let resolution = args.resolution(config)?;
    let namespaces = if args.namespaces.is_empty() {
        config.namespaces.clone()
    } else {
        args.namespaces.clone()
    };

    let options = PrometheusOptions {
        accept_invalid_certs: args.insecure,
        ..Default::default()
    };
    let metrics: Arc<dyn MetricsSource> = Arc::new(
        PrometheusClient::with_options(&prom_url, options)
            .with_context(|| format!("Invalid metrics backend URL {}", prom_url))?,
    );

    let connection = ClusterConnection {
        kubeconfig: args.kubeconfig.clone(),
        ca_file: args.ca_file.clone(),
        verify_tls: args.insecure.then_some(false),
    };
    let owners: Arc<dyn OwnerSource> = Arc::from(owner_source(
        resolution,
        metrics.clone(),
        connection,
        namespaces.clone(),
        args.owner_query.clone(),
    ));

    let queries = LabelQueries {
        energy: args.energy_query.clone(),
        power: (!args.no_power).then(|| args.power_query.clone()),
    };
    let mut aggregator = LabelAggregator::new(metrics, owners)
        .with_queries(queries)
        .with_namespaces(namespaces);
    if args.timeout > 0 {
        aggregator = aggregator.with_timeout(Duration::from_secs(args.timeout));
    }

    let report = aggregator
        .extract(&range, args.mode)
        .await
        .context("Label extraction failed")?;

    write_labels(&args.out, &report.table)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    match format {
        OutputFormat::Json => print_json(&report.stats)?,
        OutputFormat::Table => {
            let total: f64 = match &report.table {
                dataset_lib::LabelTable::Window(rows) => rows.iter().map(|r| r.energy_step_j).sum(),
                dataset_lib::LabelTable::Job(rows) => rows.iter().map(|r| r.total_energy_j).sum(),
            };
            print_success(&format!(
                "Wrote {} {} label row(s) covering {} pod(s), {} total, to {}",
                report.stats.rows,
                args.mode,
                report.stats.pods,
                format_energy(total),
                args.out.display()
            ));
            if report.stats.resolution_misses > 0 {
                print_warning(&format!(
                    "{} pod(s) had no owner in the {} owner map and were dropped",
                    report.stats.resolution_misses, report.stats.owner_source
                ));
            }
        }
    }

    Ok(())
}
