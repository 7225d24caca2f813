//! InferenceRequest emission
//!
//! Each request is written as one NDJSON line to stdout and/or an append-only
//! file, flushed per line. When a forwarding URL is configured the request is
//! also POSTed in the background; forwarding failures are logged and counted
//! but never block or fail emission.

use crate::health::HealthRegistry;
use crate::models::InferenceRequest;
use crate::observability::PipelineMetrics;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Forwards allowed in flight before emission waits for one to finish
const MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub stdout: bool,
    pub output_path: Option<PathBuf>,
    pub post_url: Option<String>,
    pub post_timeout: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            output_path: None,
            post_url: None,
            post_timeout: Duration::from_secs(5),
        }
    }
}

struct Forwarder {
    client: reqwest::Client,
    url: Url,
}

pub struct Emitter {
    stdout: bool,
    file: Option<File>,
    forwarder: Option<Forwarder>,
    in_flight: JoinSet<()>,
    metrics: PipelineMetrics,
    health: Option<HealthRegistry>,
    emitted: u64,
}

impl Emitter {
    /// Open the configured outputs; parent directories of the file are created
    pub async fn open(config: EmitterConfig) -> Result<Self> {
        let file = match &config.output_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                info!(path = %path.display(), "Appending requests to file");
                Some(file)
            }
            None => None,
        };

        let forwarder = match &config.post_url {
            Some(url) => {
                let url = Url::parse(url).with_context(|| format!("Invalid forward URL: {}", url))?;
                let client = reqwest::Client::builder()
                    .timeout(config.post_timeout)
                    .build()
                    .context("Failed to build HTTP client")?;
                info!(url = %url, "Forwarding requests over HTTP");
                Some(Forwarder { client, url })
            }
            None => None,
        };

        Ok(Self {
            stdout: config.stdout,
            file,
            forwarder,
            in_flight: JoinSet::new(),
            metrics: PipelineMetrics::new(),
            health: None,
            emitted: 0,
        })
    }

    /// Report output failures and forwarding trouble to a registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Write one request to every configured output
    pub async fn emit(&mut self, request: &InferenceRequest) -> Result<()> {
        if let Err(e) = self.write_line(request).await {
            if let Some(health) = &self.health {
                health.emitter_unhealthy(format!("{:#}", e)).await;
            }
            return Err(e);
        }

        if let Some(forwarder) = &self.forwarder {
            if self.in_flight.len() >= MAX_IN_FLIGHT {
                self.in_flight.join_next().await;
            }
            let client = forwarder.client.clone();
            let url = forwarder.url.clone();
            let request = request.clone();
            let metrics = self.metrics.clone();
            let health = self.health.clone();
            self.in_flight.spawn(async move {
                let failure = match forward_request(&client, &url, &request).await {
                    Ok(status) if status.is_success() => {
                        debug!(workload = %request.workload(), status = %status, "Forwarded request");
                        None
                    }
                    Ok(status) => {
                        metrics.inc_forward_failures();
                        warn!(workload = %request.workload(), status = %status, "Forward rejected");
                        Some(format!("forward rejected: {}", status))
                    }
                    Err(e) => {
                        metrics.inc_forward_failures();
                        warn!(workload = %request.workload(), error = %e, "Forward failed");
                        Some(format!("forward failed: {}", e))
                    }
                };
                if let Some(health) = health {
                    match failure {
                        Some(message) => health.emitter_degraded(message).await,
                        None => health.emitter_healthy().await,
                    }
                }
            });
        }

        self.emitted += 1;
        self.metrics.inc_requests_emitted();
        Ok(())
    }

    async fn write_line(&mut self, request: &InferenceRequest) -> Result<()> {
        let mut line = request.to_ndjson()?;
        line.push('\n');

        if self.stdout {
            let mut out = tokio::io::stdout();
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .context("Failed to append request")?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Drain `rx` until every sender is gone, then wait for pending forwards
    pub async fn run(mut self, mut rx: mpsc::Receiver<InferenceRequest>) -> Result<u64> {
        while let Some(request) = rx.recv().await {
            self.emit(&request).await?;
        }
        self.finish().await;
        info!(emitted = self.emitted, "Emitter finished");
        Ok(self.emitted)
    }

    /// Wait for in-flight forwards
    pub async fn finish(&mut self) {
        while self.in_flight.join_next().await.is_some() {}
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// POST one request as JSON; any HTTP status is returned to the caller
pub async fn forward_request(
    client: &reqwest::Client,
    url: &Url,
    request: &InferenceRequest,
) -> Result<StatusCode, reqwest::Error> {
    let response = client.post(url.clone()).json(request).send().await?;
    Ok(response.status())
}
