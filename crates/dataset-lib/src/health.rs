//! Liveness and readiness of the collector daemon
//!
//! Every watcher publishes its phase and the emitter publishes output
//! trouble. `/healthz` folds both into one status; `/readyz` has no flag of
//! its own and turns ready once every registered watcher is streaming.

use crate::collector::WatchPhase;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Still producing, or about to once a reconnect lands
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last change
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: HealthStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherHealth {
    pub phase: WatchPhase,
    #[serde(flatten)]
    pub health: ComponentHealth,
}

impl WatcherHealth {
    /// `detail` is the retry note or the terminal error, when there is one
    fn from_phase(phase: WatchPhase, detail: Option<String>) -> Self {
        let (status, message) = match phase {
            WatchPhase::Stream => (HealthStatus::Healthy, None),
            WatchPhase::Init | WatchPhase::Snapshot => (
                HealthStatus::Degraded,
                Some("waiting for initial list".to_string()),
            ),
            WatchPhase::Retry => (
                HealthStatus::Degraded,
                Some(detail.unwrap_or_else(|| "reconnecting".to_string())),
            ),
            WatchPhase::Terminated => match detail {
                Some(error) => (HealthStatus::Unhealthy, Some(error)),
                None => (HealthStatus::Degraded, Some("stopped".to_string())),
            },
        };
        Self {
            phase,
            health: ComponentHealth::new(status, message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Keyed by object kind
    pub watchers: BTreeMap<String, WatcherHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emitter: Option<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    watchers: BTreeMap<String, WatcherHealth>,
    emitter: Option<ComponentHealth>,
}

/// Shared view of watcher phases and emitter status
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a watcher from before its first list
    pub async fn add_watcher(&self, kind: &str) {
        self.set_watcher_phase(kind, WatchPhase::Init, None).await;
    }

    pub async fn set_watcher_phase(&self, kind: &str, phase: WatchPhase, detail: Option<String>) {
        let mut state = self.state.write().await;
        state
            .watchers
            .insert(kind.to_string(), WatcherHealth::from_phase(phase, detail));
    }

    pub async fn emitter_healthy(&self) {
        self.set_emitter(HealthStatus::Healthy, None).await;
    }

    /// Requests still go out locally but forwarding is failing
    pub async fn emitter_degraded(&self, message: impl Into<String>) {
        self.set_emitter(HealthStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn emitter_unhealthy(&self, message: impl Into<String>) {
        self.set_emitter(HealthStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set_emitter(&self, status: HealthStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        // Forward results race; only rewrite on an actual change
        if let Some(current) = &state.emitter {
            if current.status == status && current.message == message {
                return;
            }
        }
        state.emitter = Some(ComponentHealth::new(status, message));
    }

    /// Worst status across watchers and the emitter
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .watchers
            .values()
            .map(|w| w.health.status)
            .chain(state.emitter.iter().map(|e| e.status))
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthResponse {
            status,
            watchers: state.watchers.clone(),
            emitter: state.emitter.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if state.watchers.is_empty() {
            return not_ready("no watchers registered".to_string());
        }
        if let Some(emitter) = state
            .emitter
            .as_ref()
            .filter(|e| e.status == HealthStatus::Unhealthy)
        {
            return not_ready(format!(
                "emitter unhealthy: {}",
                emitter.message.as_deref().unwrap_or("unknown error")
            ));
        }

        let pending: Vec<String> = state
            .watchers
            .iter()
            .filter(|(_, w)| w.phase != WatchPhase::Stream)
            .map(|(kind, w)| format!("{} ({})", kind, w.phase.as_str()))
            .collect();
        if !pending.is_empty() {
            return not_ready(format!("not streaming: {}", pending.join(", ")));
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

fn not_ready(reason: String) -> ReadinessResponse {
    ReadinessResponse {
        ready: false,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        assert_eq!(registry.health().await.status, HealthStatus::Healthy);
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("no watchers registered"));
    }

    #[tokio::test]
    async fn test_new_watcher_waits_for_initial_list() {
        let registry = HealthRegistry::new();
        registry.add_watcher("Deployment").await;

        let health = registry.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.watchers["Deployment"].phase, WatchPhase::Init);
        assert_eq!(
            health.watchers["Deployment"].health.message.as_deref(),
            Some("waiting for initial list")
        );
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_ready_once_every_watcher_streams() {
        let registry = HealthRegistry::new();
        registry.add_watcher("Deployment").await;
        registry.add_watcher("Job").await;
        registry
            .set_watcher_phase("Deployment", WatchPhase::Stream, None)
            .await;
        registry
            .set_watcher_phase("Job", WatchPhase::Snapshot, None)
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("not streaming: Job (snapshot)"));

        registry.set_watcher_phase("Job", WatchPhase::Stream, None).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
        assert_eq!(registry.health().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_retry_drops_readiness_and_keeps_detail() {
        let registry = HealthRegistry::new();
        registry.add_watcher("CronJob").await;
        registry
            .set_watcher_phase("CronJob", WatchPhase::Stream, None)
            .await;
        registry
            .set_watcher_phase(
                "CronJob",
                WatchPhase::Retry,
                Some("reconnecting (attempt 2)".to_string()),
            )
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(
            health.watchers["CronJob"].health.message.as_deref(),
            Some("reconnecting (attempt 2)")
        );
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_terminated_watcher_with_error_is_unhealthy() {
        let registry = HealthRegistry::new();
        registry.add_watcher("Job").await;
        registry
            .set_watcher_phase(
                "Job",
                WatchPhase::Terminated,
                Some("retries exhausted".to_string()),
            )
            .await;
        assert_eq!(registry.health().await.status, HealthStatus::Unhealthy);

        registry
            .set_watcher_phase("Job", WatchPhase::Terminated, None)
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.watchers["Job"].health.message.as_deref(), Some("stopped"));
    }

    #[tokio::test]
    async fn test_unhealthy_emitter_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.add_watcher("Deployment").await;
        registry
            .set_watcher_phase("Deployment", WatchPhase::Stream, None)
            .await;
        registry.emitter_degraded("forward rejected: 503").await;

        assert_eq!(registry.health().await.status, HealthStatus::Degraded);
        assert!(registry.readiness().await.ready);

        registry.emitter_unhealthy("output file not writable").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("emitter unhealthy: output file not writable")
        );

        registry.emitter_healthy().await;
        assert!(registry.readiness().await.ready);
    }

    #[test]
    fn test_watcher_health_serializes_flat() {
        let health = WatcherHealth::from_phase(WatchPhase::Snapshot, None);
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["phase"], "snapshot");
        assert_eq!(value["status"], "degraded");
        assert_eq!(value["message"], "waiting for initial list");
    }
}
