//! Cluster object sources for the watcher
//!
//! [`ClusterSource`] is the seam between the watcher state machine and the
//! Kubernetes API: list a kind (snapshot + collection resourceVersion) and
//! watch it from a resourceVersion. [`KubeClusterSource`] implements it with
//! kube-rs against all namespaces.

use super::normalize::{IntoObserved, ObservedObject};
use super::ObjectKind;
use crate::error::{ParseError, WatchError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, WatchEvent, WatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Server-side watch timeout; the stream ends cleanly after this and is resumed
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Result of listing one kind
#[derive(Debug)]
pub struct ListSnapshot {
    pub objects: Vec<Result<ObservedObject, ParseError>>,
    /// Collection resourceVersion to start watching from
    pub resource_version: Option<String>,
}

/// One change delivered by a watch stream
#[derive(Debug)]
pub enum WatchUpdate {
    /// ADDED or MODIFIED
    Applied {
        resource_version: Option<String>,
        object: Result<ObservedObject, ParseError>,
    },
    Deleted {
        resource_version: Option<String>,
    },
    Bookmark {
        resource_version: String,
    },
}

impl WatchUpdate {
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            WatchUpdate::Applied {
                resource_version, ..
            }
            | WatchUpdate::Deleted { resource_version } => resource_version.as_deref(),
            WatchUpdate::Bookmark { resource_version } => Some(resource_version),
        }
    }
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<WatchUpdate, WatchError>> + Send>>;

/// Source of cluster objects for a watcher
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// List all objects of a kind
    async fn list(&self, kind: ObjectKind) -> Result<ListSnapshot, WatchError>;

    /// Current collection resourceVersion without materializing the objects
    async fn current_version(&self, kind: ObjectKind) -> Result<Option<String>, WatchError>;

    /// Watch a kind starting after `resource_version`
    async fn watch(&self, kind: ObjectKind, resource_version: &str)
        -> Result<UpdateStream, WatchError>;
}

/// kube-rs backed source watching all namespaces
#[derive(Clone)]
pub struct KubeClusterSource {
    client: Client,
}

impl KubeClusterSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_kind<K>(&self, params: &ListParams) -> Result<ListSnapshot, WatchError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + IntoObserved,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(params).await?;
        let resource_version = list.metadata.resource_version.clone();
        let objects = list
            .items
            .into_iter()
            .map(IntoObserved::into_observed)
            .collect();
        Ok(ListSnapshot {
            objects,
            resource_version,
        })
    }

    async fn watch_kind<K>(&self, resource_version: &str) -> Result<UpdateStream, WatchError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + IntoObserved + Send + 'static,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let events = api.watch(&params, resource_version).await?;

        let updates = events.map(|event| match event {
            Ok(WatchEvent::Added(obj)) | Ok(WatchEvent::Modified(obj)) => {
                Ok(WatchUpdate::Applied {
                    resource_version: obj.meta().resource_version.clone(),
                    object: obj.into_observed(),
                })
            }
            Ok(WatchEvent::Deleted(obj)) => Ok(WatchUpdate::Deleted {
                resource_version: obj.meta().resource_version.clone(),
            }),
            Ok(WatchEvent::Bookmark(bookmark)) => Ok(WatchUpdate::Bookmark {
                resource_version: bookmark.metadata.resource_version,
            }),
            Ok(WatchEvent::Error(status)) if status.code == 410 => {
                Err(WatchError::Expired(status.message))
            }
            Ok(WatchEvent::Error(status)) => Err(WatchError::Stream(format!(
                "{} ({})",
                status.message, status.code
            ))),
            Err(e) => Err(WatchError::Api(e)),
        });

        Ok(Box::pin(updates))
    }
}

#[async_trait]
impl ClusterSource for KubeClusterSource {
    async fn list(&self, kind: ObjectKind) -> Result<ListSnapshot, WatchError> {
        debug!(kind = %kind, "Listing objects");
        let params = ListParams::default();
        match kind {
            ObjectKind::Deployment => self.list_kind::<Deployment>(&params).await,
            ObjectKind::Job => self.list_kind::<Job>(&params).await,
            ObjectKind::CronJob => self.list_kind::<CronJob>(&params).await,
            ObjectKind::Pod => self.list_kind::<Pod>(&params).await,
            ObjectKind::StatefulSet => self.list_kind::<StatefulSet>(&params).await,
            ObjectKind::DaemonSet => self.list_kind::<DaemonSet>(&params).await,
        }
    }

    async fn current_version(&self, kind: ObjectKind) -> Result<Option<String>, WatchError> {
        // A one-item page still carries the collection resourceVersion
        let params = ListParams::default().limit(1);
        let snapshot = match kind {
            ObjectKind::Deployment => self.list_kind::<Deployment>(&params).await?,
            ObjectKind::Job => self.list_kind::<Job>(&params).await?,
            ObjectKind::CronJob => self.list_kind::<CronJob>(&params).await?,
            ObjectKind::Pod => self.list_kind::<Pod>(&params).await?,
            ObjectKind::StatefulSet => self.list_kind::<StatefulSet>(&params).await?,
            ObjectKind::DaemonSet => self.list_kind::<DaemonSet>(&params).await?,
        };
        Ok(snapshot.resource_version)
    }

    async fn watch(
        &self,
        kind: ObjectKind,
        resource_version: &str,
    ) -> Result<UpdateStream, WatchError> {
        debug!(kind = %kind, resource_version = %resource_version, "Opening watch");
        match kind {
            ObjectKind::Deployment => self.watch_kind::<Deployment>(resource_version).await,
            ObjectKind::Job => self.watch_kind::<Job>(resource_version).await,
            ObjectKind::CronJob => self.watch_kind::<CronJob>(resource_version).await,
            ObjectKind::Pod => self.watch_kind::<Pod>(resource_version).await,
            ObjectKind::StatefulSet => self.watch_kind::<StatefulSet>(resource_version).await,
            ObjectKind::DaemonSet => self.watch_kind::<DaemonSet>(resource_version).await,
        }
    }
}
