//! Cluster watcher state machine
//!
//! One watcher per object kind. Phases:
//!
//! ```text
//! INIT ──► SNAPSHOT ──► STREAM ──► (stream ends) ──► STREAM
//!   │          ▲          │
//!   │          └─ expired ┤
//!   └──► STREAM           └─ error ──► RETRY ──► STREAM / SNAPSHOT / INIT
//!                                        └─ attempts exhausted ──► TERMINATED
//! ```
//!
//! SNAPSHOT lists and emits every current object; it runs first only when
//! initial emission is requested, and always after the server reports the
//! resourceVersion as expired. STREAM resumes from the last resourceVersion
//! seen. Every emission goes through the dedup cache.

use super::normalize::{to_inference_request, ObservedObject};
use super::seen::{SeenCache, SeenKey, DEFAULT_TTL};
use super::source::{ClusterSource, WatchUpdate};
use super::ObjectKind;
use crate::error::{ParseError, WatchError};
use crate::health::HealthRegistry;
use crate::models::InferenceRequest;
use crate::observability::{PipelineMetrics, StructuredLogger};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Configuration for one kind's watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub kind: ObjectKind,
    /// Namespaces to emit for; empty means all
    pub namespaces: Vec<String>,
    /// List and emit all existing objects before streaming changes
    pub emit_initial: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed attempts tolerated before giving up
    pub max_retries: u32,
    pub dedup_ttl: Duration,
}

impl WatcherConfig {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            namespaces: Vec::new(),
            emit_initial: false,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_retries: 10,
            dedup_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_emit_initial(mut self, emit_initial: bool) -> Self {
        self.emit_initial = emit_initial;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchPhase {
    Init,
    Snapshot,
    Stream,
    Retry,
    Terminated,
}

impl WatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchPhase::Init => "init",
            WatchPhase::Snapshot => "snapshot",
            WatchPhase::Stream => "stream",
            WatchPhase::Retry => "retry",
            WatchPhase::Terminated => "terminated",
        }
    }

    fn code(&self) -> i64 {
        match self {
            WatchPhase::Init => 0,
            WatchPhase::Snapshot => 1,
            WatchPhase::Stream => 2,
            WatchPhase::Retry => 3,
            WatchPhase::Terminated => 4,
        }
    }
}

/// Counters for one watcher's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub objects: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub filtered: u64,
    pub parse_errors: u64,
    pub retries: u64,
    pub resyncs: u64,
}

/// Watches one object kind and emits InferenceRequests
pub struct ClusterWatcher {
    source: Arc<dyn ClusterSource>,
    config: WatcherConfig,
    seen: SeenCache,
    phase: WatchPhase,
    resource_version: Option<String>,
    needs_snapshot: bool,
    attempts: u32,
    current_backoff: Duration,
    failure: Option<WatchError>,
    stats: WatchStats,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl ClusterWatcher {
    pub fn new(source: Arc<dyn ClusterSource>, config: WatcherConfig) -> Self {
        Self {
            seen: SeenCache::new(config.dedup_ttl),
            needs_snapshot: config.emit_initial,
            current_backoff: config.initial_backoff,
            source,
            config,
            phase: WatchPhase::Init,
            resource_version: None,
            attempts: 0,
            failure: None,
            stats: WatchStats::default(),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("watcher"),
            health: None,
        }
    }

    /// Report phase health to a registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// Run until shutdown, receiver drop, or retries are exhausted
    pub async fn run(
        mut self,
        tx: mpsc::Sender<InferenceRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<WatchStats, WatchError> {
        info!(
            kind = %self.config.kind,
            emit_initial = self.config.emit_initial,
            namespaces = ?self.config.namespaces,
            "Starting watcher"
        );
        self.report_health().await;

        while self.phase != WatchPhase::Terminated {
            let next = match self.phase {
                WatchPhase::Init => self.init(&mut shutdown).await,
                WatchPhase::Snapshot => self.snapshot(&tx, &mut shutdown).await,
                WatchPhase::Stream => self.stream(&tx, &mut shutdown).await,
                WatchPhase::Retry => self.retry(&mut shutdown).await,
                WatchPhase::Terminated => WatchPhase::Terminated,
            };
            self.transition(next).await;
        }

        self.seen.clear();
        info!(
            kind = %self.config.kind,
            emitted = self.stats.emitted,
            suppressed = self.stats.suppressed,
            "Watcher stopped"
        );

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self.stats),
        }
    }

    async fn init(&mut self, shutdown: &mut broadcast::Receiver<()>) -> WatchPhase {
        if self.needs_snapshot {
            return WatchPhase::Snapshot;
        }

        let result = tokio::select! {
            _ = shutdown.recv() => return WatchPhase::Terminated,
            result = self.source.current_version(self.config.kind) => result,
        };

        match result {
            Ok(Some(rv)) => {
                self.resource_version = Some(rv);
                WatchPhase::Stream
            }
            Ok(None) => self.on_error(WatchError::Stream(
                "list response carried no resourceVersion".to_string(),
            )),
            Err(e) => self.on_error(e),
        }
    }

    async fn snapshot(
        &mut self,
        tx: &mpsc::Sender<InferenceRequest>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> WatchPhase {
        let result = tokio::select! {
            _ = shutdown.recv() => return WatchPhase::Terminated,
            result = self.source.list(self.config.kind) => result,
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => return self.on_error(e),
        };

        debug!(
            kind = %self.config.kind,
            objects = snapshot.objects.len(),
            resource_version = ?snapshot.resource_version,
            "Listed objects"
        );

        for object in snapshot.objects {
            if !self.handle_object(object, tx).await {
                return WatchPhase::Terminated;
            }
        }

        self.needs_snapshot = false;
        self.reset_backoff();
        match snapshot.resource_version {
            Some(rv) => {
                self.resource_version = Some(rv);
                WatchPhase::Stream
            }
            None => self.on_error(WatchError::Stream(
                "list response carried no resourceVersion".to_string(),
            )),
        }
    }

    async fn stream(
        &mut self,
        tx: &mpsc::Sender<InferenceRequest>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> WatchPhase {
        let from = self.resource_version.clone().unwrap_or_default();

        let result = tokio::select! {
            _ = shutdown.recv() => return WatchPhase::Terminated,
            result = self.source.watch(self.config.kind, &from) => result,
        };

        let mut updates = match result {
            Ok(updates) => updates,
            Err(e) => return self.on_error(e),
        };
        self.report_health().await;

        let mut delivered = false;
        loop {
            let item = tokio::select! {
                // Dropping `updates` on return closes the connection
                _ = shutdown.recv() => return WatchPhase::Terminated,
                item = updates.next() => item,
            };

            match item {
                None if delivered => {
                    debug!(
                        kind = %self.config.kind,
                        resource_version = ?self.resource_version,
                        "Watch stream ended, resuming"
                    );
                    return WatchPhase::Stream;
                }
                None => {
                    // Closed without a single item; back off before re-watching
                    let delay = self.current_backoff;
                    debug!(
                        kind = %self.config.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Watch stream closed empty"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return WatchPhase::Terminated,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.current_backoff =
                        std::cmp::min(self.current_backoff * 2, self.config.max_backoff);
                    return WatchPhase::Stream;
                }
                Some(Ok(update)) => {
                    delivered = true;
                    self.reset_backoff();
                    if let Some(rv) = update.resource_version() {
                        self.resource_version = Some(rv.to_string());
                    }
                    if let WatchUpdate::Applied { object, .. } = update {
                        if !self.handle_object(object, tx).await {
                            return WatchPhase::Terminated;
                        }
                    }
                }
                Some(Err(e)) => return self.on_error(e),
            }
        }
    }

    async fn retry(&mut self, shutdown: &mut broadcast::Receiver<()>) -> WatchPhase {
        let delay = self.current_backoff;
        self.stats.retries += 1;
        self.metrics
            .inc_watch_restarts(self.config.kind.as_str(), "retry");

        tokio::select! {
            _ = shutdown.recv() => return WatchPhase::Terminated,
            _ = tokio::time::sleep(delay) => {}
        }

        self.current_backoff = std::cmp::min(self.current_backoff * 2, self.config.max_backoff);

        if self.needs_snapshot {
            WatchPhase::Snapshot
        } else if self.resource_version.is_some() {
            WatchPhase::Stream
        } else {
            WatchPhase::Init
        }
    }

    /// Decide the next phase after a failure
    fn on_error(&mut self, error: WatchError) -> WatchPhase {
        if error.is_expired() {
            self.stats.resyncs += 1;
            self.metrics
                .inc_watch_restarts(self.config.kind.as_str(), "resync");
            self.logger
                .log_resync(self.config.kind.as_str(), self.resource_version.as_deref());
            self.resource_version = None;
            self.needs_snapshot = true;
            return WatchPhase::Snapshot;
        }

        self.attempts += 1;
        if self.attempts > self.config.max_retries {
            warn!(
                kind = %self.config.kind,
                attempts = self.attempts,
                error = %error,
                "Watcher giving up"
            );
            self.failure = Some(WatchError::RetriesExhausted {
                attempts: self.attempts,
                last_error: error.to_string(),
            });
            return WatchPhase::Terminated;
        }

        self.logger.log_retry(
            self.config.kind.as_str(),
            self.attempts,
            self.current_backoff.as_millis() as u64,
            &error.to_string(),
        );
        WatchPhase::Retry
    }

    /// Filter, dedupe and forward one object. Returns false once the
    /// receiving side is gone.
    async fn handle_object(
        &mut self,
        object: Result<ObservedObject, ParseError>,
        tx: &mpsc::Sender<InferenceRequest>,
    ) -> bool {
        self.stats.objects += 1;
        self.metrics.inc_watch_events(self.config.kind.as_str());

        let object = match object {
            Ok(object) => object,
            Err(e) => {
                warn!(kind = %self.config.kind, error = %e, "Skipping malformed object");
                self.stats.parse_errors += 1;
                self.metrics.inc_parse_errors();
                return true;
            }
        };

        if !self.namespace_allowed(&object.namespace) {
            self.stats.filtered += 1;
            return true;
        }

        let key = SeenKey::new(
            object.namespace.as_str(),
            object.kind.as_str(),
            object.name.as_str(),
            object.resource_version.as_deref().unwrap_or_default(),
        );
        if self.seen.seen(&key) {
            self.stats.suppressed += 1;
            self.metrics.inc_duplicates_suppressed();
            return true;
        }

        let request = to_inference_request(&object);
        if tx.send(request).await.is_err() {
            debug!(kind = %self.config.kind, "Request receiver closed");
            return false;
        }
        self.stats.emitted += 1;
        true
    }

    fn namespace_allowed(&self, namespace: &str) -> bool {
        self.config.namespaces.is_empty() || self.config.namespaces.iter().any(|ns| ns == namespace)
    }

    fn reset_backoff(&mut self) {
        self.attempts = 0;
        self.current_backoff = self.config.initial_backoff;
    }

    async fn transition(&mut self, next: WatchPhase) {
        if next == self.phase {
            return;
        }
        let kind = self.config.kind.as_str();
        self.logger
            .log_phase_change(kind, self.phase.as_str(), next.as_str());
        self.metrics.set_watch_phase(kind, next.code());
        self.phase = next;
        self.report_health().await;
    }

    async fn report_health(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let detail = match self.phase {
            WatchPhase::Retry => Some(format!("reconnecting (attempt {})", self.attempts)),
            WatchPhase::Terminated => self.failure.as_ref().map(|e| e.to_string()),
            _ => None,
        };
        health
            .set_watcher_phase(self.config.kind.as_str(), self.phase, detail)
            .await;
    }
}

/// Spawn one watcher task per configured kind, all feeding `tx`
pub fn spawn_watchers(
    source: Arc<dyn ClusterSource>,
    configs: Vec<WatcherConfig>,
    tx: mpsc::Sender<InferenceRequest>,
    shutdown: &broadcast::Sender<()>,
    health: Option<HealthRegistry>,
) -> Vec<(ObjectKind, JoinHandle<Result<WatchStats, WatchError>>)> {
    configs
        .into_iter()
        .map(|config| {
            let kind = config.kind;
            let mut watcher = ClusterWatcher::new(source.clone(), config);
            if let Some(health) = &health {
                watcher = watcher.with_health(health.clone());
            }
            let handle = tokio::spawn(watcher.run(tx.clone(), shutdown.subscribe()));
            (kind, handle)
        })
        .collect()
}
