//! Offline collection from manifest files
//!
//! Accepts single or multi-document YAML (JSON is valid YAML) and yields one
//! InferenceRequest per supported document.

use super::normalize::{to_inference_request, IntoObserved};
use crate::error::ParseError;
use crate::models::InferenceRequest;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use serde_json::Value;

/// Parse every document in `yaml` into an InferenceRequest
///
/// Empty documents are skipped. A document of an unsupported kind fails the
/// whole call with [`ParseError::UnsupportedKind`].
pub fn requests_from_manifest(yaml: &str) -> Result<Vec<InferenceRequest>, ParseError> {
    let mut requests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let mut value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        stringify_quantities(&mut value);

        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let observed = match kind.as_str() {
            "Deployment" => serde_json::from_value::<Deployment>(value)?.into_observed()?,
            "StatefulSet" => serde_json::from_value::<StatefulSet>(value)?.into_observed()?,
            "DaemonSet" => serde_json::from_value::<DaemonSet>(value)?.into_observed()?,
            "Job" => serde_json::from_value::<Job>(value)?.into_observed()?,
            "CronJob" => serde_json::from_value::<CronJob>(value)?.into_observed()?,
            "Pod" => serde_json::from_value::<Pod>(value)?.into_observed()?,
            "" => {
                return Err(ParseError::MalformedObject {
                    kind: "<unknown>".to_string(),
                    reason: "document has no kind".to_string(),
                })
            }
            other => return Err(ParseError::UnsupportedKind(other.to_string())),
        };

        requests.push(to_inference_request(&observed));
    }

    Ok(requests)
}

/// Hand-written manifests often use bare numbers (`cpu: 1`, `memory: 512`)
/// where the API expects quantity strings.
fn stringify_quantities(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "requests" || key == "limits" {
                    if let Value::Object(quantities) = child {
                        for qty in quantities.values_mut() {
                            if let Value::Number(n) = qty {
                                *qty = Value::String(n.to_string());
                            }
                        }
                    }
                } else {
                    stringify_quantities(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(stringify_quantities),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadKind;

    const MULTI_DOC: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
spec:
  selector:
    matchLabels: {app: nginx}
  template:
    metadata:
      labels: {app: nginx}
    spec:
      containers:
        - name: nginx
          image: nginx:1.25
          resources:
            requests: {cpu: 100m, memory: 128Mi}
            limits: {cpu: 1, memory: 256Mi}
---
---
apiVersion: batch/v1
kind: CronJob
metadata:
  name: report
  namespace: batch
spec:
  schedule: "0 * * * *"
  jobTemplate:
    spec:
      parallelism: 2
      template:
        spec:
          restartPolicy: OnFailure
          containers:
            - name: report
              image: report:latest
"#;

    #[test]
    fn test_multi_document_manifest() {
        let requests = requests_from_manifest(MULTI_DOC).unwrap();
        assert_eq!(requests.len(), 2);

        let nginx = &requests[0];
        assert_eq!(nginx.namespace, "default");
        assert_eq!(nginx.workload_kind, WorkloadKind::Deployment);
        assert_eq!(nginx.containers[0].req_cpu_mcpu, 100);
        assert_eq!(nginx.containers[0].req_mem_mib, 128);
        assert_eq!(nginx.containers[0].lim_cpu_mcpu, 1000);
        assert_eq!(nginx.labels.get("app").map(String::as_str), Some("nginx"));

        let report = &requests[1];
        assert_eq!(report.namespace, "batch");
        assert_eq!(report.workload_kind, WorkloadKind::CronJob);
        assert_eq!(report.parallelism, Some(2));
    }

    #[test]
    fn test_unsupported_kind() {
        let yaml = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n";
        match requests_from_manifest(yaml) {
            Err(ParseError::UnsupportedKind(kind)) => assert_eq!(kind, "Service"),
            other => panic!("expected UnsupportedKind, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_kind_is_malformed() {
        let yaml = "metadata:\n  name: web\n";
        assert!(matches!(
            requests_from_manifest(yaml),
            Err(ParseError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_json_manifest() {
        let json = r#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":"debug"},
            "spec":{"containers":[{"name":"sh","image":"busybox"}]}}"#;
        let requests = requests_from_manifest(json).unwrap();
        assert_eq!(requests[0].workload_kind, WorkloadKind::Pod);
        assert_eq!(requests[0].workload_name, "debug");
    }
}
