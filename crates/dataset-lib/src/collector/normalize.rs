//! Normalization of cluster objects into InferenceRequests
//!
//! Every supported kind is first reduced to an [`ObservedObject`]: identity,
//! owner chain and the pod template (unwrapped from wherever the kind nests
//! it). The request is then assembled from that uniform shape.

use super::ObjectKind;
use crate::canonical::{canonicalize, controller_link, OwnerLink};
use crate::error::ParseError;
use crate::models::{ContainerSpec, InferenceRequest, SCHEMA_VERSION};
use crate::quantity::{cpu_or_zero, memory_or_zero};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};

const DEFAULT_NAMESPACE: &str = "default";

const INSTANCE_TYPE_KEYS: &[&str] = &[
    "node.kubernetes.io/instance-type",
    "beta.kubernetes.io/instance-type",
];

/// Kind-agnostic view of one observed object revision
#[derive(Debug, Clone)]
pub struct ObservedObject {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub resource_version: Option<String>,
    /// Owner chain, nearest first
    pub owners: Vec<OwnerLink>,
    pub template: PodTemplateSpec,
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
}

/// Conversion of a typed cluster object into an [`ObservedObject`]
pub trait IntoObserved {
    fn into_observed(self) -> Result<ObservedObject, ParseError>;
}

fn identity(kind: ObjectKind, meta: &ObjectMeta) -> Result<(String, String), ParseError> {
    let name = meta
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::MalformedObject {
            kind: kind.to_string(),
            reason: "metadata.name is missing".to_string(),
        })?;
    let namespace = meta
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    Ok((namespace, name))
}

fn missing(kind: ObjectKind, what: &str) -> ParseError {
    ParseError::MalformedObject {
        kind: kind.to_string(),
        reason: format!("{} is missing", what),
    }
}

fn observed(
    kind: ObjectKind,
    meta: &ObjectMeta,
    template: PodTemplateSpec,
) -> Result<ObservedObject, ParseError> {
    let (namespace, name) = identity(kind, meta)?;
    Ok(ObservedObject {
        kind,
        namespace,
        name,
        resource_version: meta.resource_version.clone(),
        owners: controller_link(meta).into_iter().collect(),
        template,
        parallelism: None,
        completions: None,
    })
}

impl IntoObserved for Deployment {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        let spec = self.spec.ok_or_else(|| missing(ObjectKind::Deployment, "spec"))?;
        observed(ObjectKind::Deployment, &self.metadata, spec.template)
    }
}

impl IntoObserved for StatefulSet {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        let spec = self.spec.ok_or_else(|| missing(ObjectKind::StatefulSet, "spec"))?;
        observed(ObjectKind::StatefulSet, &self.metadata, spec.template)
    }
}

impl IntoObserved for DaemonSet {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        let spec = self.spec.ok_or_else(|| missing(ObjectKind::DaemonSet, "spec"))?;
        observed(ObjectKind::DaemonSet, &self.metadata, spec.template)
    }
}

impl IntoObserved for Job {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        let spec = self.spec.ok_or_else(|| missing(ObjectKind::Job, "spec"))?;
        let mut obj = observed(ObjectKind::Job, &self.metadata, spec.template)?;
        obj.parallelism = spec.parallelism;
        obj.completions = spec.completions;
        Ok(obj)
    }
}

impl IntoObserved for CronJob {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        // The pod template sits one level deeper: spec.jobTemplate.spec.template
        let job_spec = self
            .spec
            .and_then(|s| s.job_template.spec)
            .ok_or_else(|| missing(ObjectKind::CronJob, "spec.jobTemplate.spec"))?;
        let mut obj = observed(ObjectKind::CronJob, &self.metadata, job_spec.template)?;
        obj.parallelism = job_spec.parallelism;
        obj.completions = job_spec.completions;
        Ok(obj)
    }
}

impl IntoObserved for Pod {
    fn into_observed(self) -> Result<ObservedObject, ParseError> {
        let spec = self.spec.ok_or_else(|| missing(ObjectKind::Pod, "spec"))?;
        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: self.metadata.labels.clone(),
                annotations: self.metadata.annotations.clone(),
                ..Default::default()
            }),
            spec: Some(spec),
        };
        observed(ObjectKind::Pod, &self.metadata, template)
    }
}

fn volume_type(volume: &Volume) -> &'static str {
    if volume.empty_dir.is_some() {
        "emptyDir"
    } else if volume.host_path.is_some() {
        "hostPath"
    } else if volume.persistent_volume_claim.is_some() {
        "persistentVolumeClaim"
    } else if volume.config_map.is_some() {
        "configMap"
    } else if volume.secret.is_some() {
        "secret"
    } else if volume.downward_api.is_some() {
        "downwardAPI"
    } else if volume.projected.is_some() {
        "projected"
    } else if volume.nfs.is_some() {
        "nfs"
    } else if volume.ephemeral.is_some() {
        "ephemeral"
    } else {
        "other"
    }
}

fn to_container_spec(container: &Container) -> ContainerSpec {
    let resources = container.resources.as_ref();
    let request = |name: &str| {
        resources
            .and_then(|r| r.requests.as_ref())
            .and_then(|m| m.get(name))
            .map(|q| q.0.as_str())
    };
    let limit = |name: &str| {
        resources
            .and_then(|r| r.limits.as_ref())
            .and_then(|m| m.get(name))
            .map(|q| q.0.as_str())
    };

    ContainerSpec {
        name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone(),
        args: container.args.clone(),
        req_cpu_mcpu: cpu_or_zero(request("cpu")),
        req_mem_mib: memory_or_zero(request("memory")),
        lim_cpu_mcpu: cpu_or_zero(limit("cpu")),
        lim_mem_mib: memory_or_zero(limit("memory")),
    }
}

/// Sum of every `*gpu*` limit across containers
fn gpu_count(containers: &[Container]) -> u32 {
    containers
        .iter()
        .filter_map(|c| c.resources.as_ref().and_then(|r| r.limits.as_ref()))
        .flat_map(|limits| limits.iter())
        .filter(|(name, _)| name.contains("gpu"))
        .filter_map(|(_, qty)| qty.0.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
        .sum()
}

fn is_native_sidecar(container: &Container) -> bool {
    container.restart_policy.as_deref() == Some("Always")
}

/// Assemble the canonical request for one observed object
pub fn to_inference_request(obj: &ObservedObject) -> InferenceRequest {
    let workload = canonicalize(obj.kind.as_str(), &obj.name, &obj.owners);

    let meta = obj.template.metadata.as_ref();
    let labels: BTreeMap<String, String> = meta.and_then(|m| m.labels.clone()).unwrap_or_default();
    let annotations: BTreeMap<String, String> =
        meta.and_then(|m| m.annotations.clone()).unwrap_or_default();

    let empty = PodSpec::default();
    let spec = obj.template.spec.as_ref().unwrap_or(&empty);

    let init_containers = spec.init_containers.as_deref().unwrap_or_default();
    let sidecar_count = init_containers.iter().filter(|c| is_native_sidecar(c)).count();
    let init_container_count = init_containers.len() - sidecar_count;

    let volume_types: BTreeSet<String> = spec
        .volumes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|v| volume_type(v).to_string())
        .collect();

    let node_type = spec.node_selector.as_ref().and_then(|selector| {
        INSTANCE_TYPE_KEYS
            .iter()
            .find_map(|key| selector.get(*key).cloned())
    });

    InferenceRequest {
        schema_version: SCHEMA_VERSION.to_string(),
        namespace: obj.namespace.clone(),
        workload_kind: workload.kind,
        workload_name: workload.name,
        labels,
        annotations,
        containers: spec.containers.iter().map(to_container_spec).collect(),
        init_container_count: init_container_count as u32,
        sidecar_count: sidecar_count as u32,
        volume_types,
        node_type,
        runtime_class: spec.runtime_class_name.clone(),
        gpu_count: gpu_count(&spec.containers),
        parallelism: obj.parallelism,
        completions: obj.completions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadKind;
    use serde_json::json;

    fn typed<K: serde::de::DeserializeOwned + k8s_openapi::Resource>(
        mut value: serde_json::Value,
    ) -> K {
        value["apiVersion"] = json!(K::API_VERSION);
        value["kind"] = json!(K::KIND);
        serde_json::from_value(value).unwrap()
    }

    fn deployment(value: serde_json::Value) -> Deployment {
        typed(value)
    }

    #[test]
    fn test_deployment_request() {
        let d = deployment(json!({
            "metadata": {"name": "nginx", "namespace": "default", "resourceVersion": "42"},
            "spec": {
                "selector": {"matchLabels": {"app": "nginx"}},
                "template": {
                    "metadata": {"labels": {"app": "nginx"}},
                    "spec": {
                        "runtimeClassName": "gvisor",
                        "nodeSelector": {"node.kubernetes.io/instance-type": "m5.large"},
                        "containers": [{
                            "name": "nginx",
                            "image": "nginx:1.25",
                            "resources": {
                                "requests": {"cpu": "100m", "memory": "128Mi"},
                                "limits": {"cpu": "1", "memory": "1Gi", "nvidia.com/gpu": "2"}
                            }
                        }],
                        "volumes": [
                            {"name": "cache", "emptyDir": {}},
                            {"name": "cfg", "configMap": {"name": "nginx"}},
                            {"name": "tmp", "emptyDir": {}}
                        ]
                    }
                }
            }
        }));

        let obj = d.into_observed().unwrap();
        assert_eq!(obj.resource_version.as_deref(), Some("42"));

        let ir = to_inference_request(&obj);
        assert_eq!(ir.workload_kind, WorkloadKind::Deployment);
        assert_eq!(ir.workload_name, "nginx");
        assert_eq!(ir.containers.len(), 1);
        assert_eq!(ir.containers[0].req_cpu_mcpu, 100);
        assert_eq!(ir.containers[0].req_mem_mib, 128);
        assert_eq!(ir.containers[0].lim_cpu_mcpu, 1000);
        assert_eq!(ir.containers[0].lim_mem_mib, 1024);
        assert_eq!(ir.gpu_count, 2);
        assert_eq!(ir.node_type.as_deref(), Some("m5.large"));
        assert_eq!(ir.runtime_class.as_deref(), Some("gvisor"));
        assert_eq!(
            ir.volume_types.iter().cloned().collect::<Vec<_>>(),
            vec!["configMap".to_string(), "emptyDir".to_string()]
        );
        assert_eq!(ir.labels.get("app").map(String::as_str), Some("nginx"));
    }

    #[test]
    fn test_malformed_quantity_only_zeroes_that_field() {
        let d = deployment(json!({
            "metadata": {"name": "web", "namespace": "shop"},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [
                    {"name": "a", "resources": {"requests": {"cpu": "fast", "memory": "64Mi"}}},
                    {"name": "b", "resources": {"requests": {"cpu": "250m"}}}
                ]}}
            }
        }));
        let ir = to_inference_request(&d.into_observed().unwrap());
        assert_eq!(ir.containers.len(), 2);
        assert_eq!(ir.containers[0].req_cpu_mcpu, 0);
        assert_eq!(ir.containers[0].req_mem_mib, 64);
        assert_eq!(ir.containers[1].req_cpu_mcpu, 250);
    }

    #[test]
    fn test_cronjob_template_is_unwrapped() {
        let cj: CronJob = typed(json!({
            "metadata": {"name": "backup", "namespace": "ops"},
            "spec": {
                "schedule": "0 * * * *",
                "jobTemplate": {"spec": {
                    "parallelism": 2,
                    "template": {"spec": {
                        "restartPolicy": "Never",
                        "containers": [{"name": "dump", "image": "pg:16"}]
                    }}
                }}
            }
        }));

        let ir = to_inference_request(&cj.into_observed().unwrap());
        assert_eq!(ir.workload_kind, WorkloadKind::CronJob);
        assert_eq!(ir.workload_name, "backup");
        assert_eq!(ir.parallelism, Some(2));
        assert_eq!(ir.containers[0].image, "pg:16");
    }

    #[test]
    fn test_cronjob_without_job_template_is_malformed() {
        let cj: CronJob = typed(json!({
            "metadata": {"name": "broken", "namespace": "ops"},
            "spec": {"schedule": "* * * * *", "jobTemplate": {}}
        }));
        assert!(cj.into_observed().is_err());
    }

    #[test]
    fn test_pod_owned_by_replicaset_canonicalizes_to_deployment() {
        let pod: Pod = typed(json!({
            "metadata": {
                "name": "nginx-7d9f8c6b5-x2x9z",
                "namespace": "default",
                "labels": {"app": "nginx"},
                "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "ReplicaSet",
                    "name": "nginx-7d9f8c6b5", "uid": "u1", "controller": true
                }]
            },
            "spec": {
                "initContainers": [
                    {"name": "setup"},
                    {"name": "proxy", "restartPolicy": "Always"}
                ],
                "containers": [{"name": "nginx"}]
            }
        }));

        let ir = to_inference_request(&pod.into_observed().unwrap());
        assert_eq!(ir.workload_kind, WorkloadKind::Deployment);
        assert_eq!(ir.workload_name, "nginx");
        assert_eq!(ir.init_container_count, 1);
        assert_eq!(ir.sidecar_count, 1);
        assert_eq!(ir.labels.get("app").map(String::as_str), Some("nginx"));
    }

    #[test]
    fn test_job_keeps_parallelism_hints() {
        let job: Job = typed(json!({
            "metadata": {"name": "etl", "namespace": "data"},
            "spec": {"completions": 4, "parallelism": 2,
                     "template": {"spec": {"containers": [{"name": "run"}]}}}
        }));
        let ir = to_inference_request(&job.into_observed().unwrap());
        assert_eq!(ir.workload_kind, WorkloadKind::Job);
        assert_eq!(ir.completions, Some(4));
        assert_eq!(ir.parallelism, Some(2));
    }
}
