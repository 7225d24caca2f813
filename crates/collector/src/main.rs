//! Workload collector - cluster watcher producing InferenceRequests
//!
//! Runs one watcher per configured object kind, normalizes every accepted
//! object into an InferenceRequest and emits it as NDJSON (stdout, file,
//! optional HTTP forward).

use anyhow::{bail, Context, Result};
use dataset_lib::{
    collector::{spawn_watchers, ClusterSource, Emitter, KubeClusterSource, ObjectKind, WatchStats},
    error::WatchError,
    health::HealthRegistry,
    observability::StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workload_collector::{api, config::CollectorConfig};

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Requests buffered between the watchers and the emitter
const CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting workload-collector");

    let config = CollectorConfig::load()?;
    let watcher_configs = config.watcher_configs()?;
    let kinds: Vec<String> = watcher_configs.iter().map(|w| w.kind.to_string()).collect();

    // Watchers start in INIT, so readiness waits for every first list
    let health_registry = HealthRegistry::new();
    for kind in &kinds {
        health_registry.add_watcher(kind).await;
    }
    health_registry.emitter_healthy().await;

    let logger = StructuredLogger::new("collector");
    logger.log_startup(COLLECTOR_VERSION, &kinds);

    let client = config
        .connection()
        .client()
        .await
        .context("Failed to build Kubernetes client")?;
    let source: Arc<dyn ClusterSource> = Arc::new(KubeClusterSource::new(client));

    let emitter = Emitter::open(config.emitter_config())
        .await?
        .with_health(health_registry.clone());
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown_tx, _) = broadcast::channel(1);

    let handles = spawn_watchers(
        source,
        watcher_configs,
        tx,
        &shutdown_tx,
        Some(health_registry.clone()),
    );
    let emitter_handle = tokio::spawn(emitter.run(rx));

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    tokio::spawn(api::serve(config.api_port, app_state));

    let mut watchers_done = Box::pin(wait_for_watchers(handles));
    let failures = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
            let _ = shutdown_tx.send(());
            (&mut watchers_done).await
        }
        failures = &mut watchers_done => {
            logger.log_shutdown("all watchers stopped");
            failures
        }
    };

    // Watchers own every sender, so the emitter drains and stops after them
    let emitted = emitter_handle.await??;
    info!(emitted, "Shutting down");

    if failures > 0 {
        bail!("{} watcher(s) failed", failures);
    }
    Ok(())
}

/// Await every watcher; returns how many ended in error
async fn wait_for_watchers(
    handles: Vec<(ObjectKind, JoinHandle<Result<WatchStats, WatchError>>)>,
) -> usize {
    let mut failures = 0;
    for (kind, handle) in handles {
        match handle.await {
            Ok(Ok(stats)) => info!(
                kind = %kind,
                emitted = stats.emitted,
                suppressed = stats.suppressed,
                resyncs = stats.resyncs,
                "Watcher finished"
            ),
            Ok(Err(e)) => {
                error!(kind = %kind, error = %e, "Watcher failed");
                failures += 1;
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "Watcher task panicked");
                failures += 1;
            }
        }
    }
    failures
}
