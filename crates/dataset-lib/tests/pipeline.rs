//! Manifest → labels → training table, against a mocked metrics backend

use dataset_lib::collector::requests_from_manifest;
use dataset_lib::dataset::{
    read_features, read_labels, read_table, write_features, write_labels, write_training, Table,
};
use dataset_lib::labels::{
    LabelAggregator, MetricsOwnerSource, PrometheusClient, QueryRange, DEFAULT_ENERGY_QUERY,
    DEFAULT_JOB_OWNER_QUERY, DEFAULT_OWNER_QUERY, DEFAULT_POWER_QUERY,
};
use dataset_lib::{AggregationMode, DatasetJoiner, FeatureRow, JoinStatus, LabelTable, WorkloadKind};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;

const START: i64 = 1_714_564_800;

const NGINX: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
  namespace: default
spec:
  selector:
    matchLabels:
      app: nginx
  template:
    metadata:
      labels:
        app: nginx
    spec:
      containers:
        - name: nginx
          image: nginx:1.25
          resources:
            requests:
              cpu: 100m
              memory: 128Mi
"#;

fn matrix(result: serde_json::Value) -> String {
    json!({"status": "success", "data": {"resultType": "matrix", "result": result}}).to_string()
}

async fn mock_query(server: &mut mockito::ServerGuard, query: &str, body: String) -> mockito::Mock {
    server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::UrlEncoded("query".into(), query.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_manifest_labels_and_join() {
    // Feature side
    let requests = requests_from_manifest(NGINX).unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.namespace, "default");
    assert_eq!(request.workload_kind, WorkloadKind::Deployment);
    assert_eq!(request.workload_name, "nginx");
    assert_eq!(request.containers[0].req_cpu_mcpu, 100);
    assert_eq!(request.containers[0].req_mem_mib, 128);

    // Label side: counter rising 3600 J over one hour
    let mut server = mockito::Server::new_async().await;
    let values: Vec<serde_json::Value> = (0..=60)
        .map(|i| json!([START + i * 60, format!("{}", i * 60)]))
        .collect();
    let energy = mock_query(
        &mut server,
        DEFAULT_ENERGY_QUERY,
        matrix(json!([{
            "metric": {"container_namespace": "default", "pod_name": "nginx-7d9f8c6b5-x2x9q"},
            "values": values,
        }])),
    )
    .await;
    let _power = mock_query(&mut server, DEFAULT_POWER_QUERY, matrix(json!([]))).await;
    let owners = mock_query(
        &mut server,
        DEFAULT_OWNER_QUERY,
        matrix(json!([{
            "metric": {
                "namespace": "default",
                "pod": "nginx-7d9f8c6b5-x2x9q",
                "owner_kind": "ReplicaSet",
                "owner_name": "nginx-7d9f8c6b5",
            },
            "values": [[START, "1"]],
        }])),
    )
    .await;
    let _job_owners = mock_query(&mut server, DEFAULT_JOB_OWNER_QUERY, matrix(json!([]))).await;

    let client = Arc::new(PrometheusClient::new(&server.url()).unwrap());
    let owner_source = Arc::new(MetricsOwnerSource::new(client.clone()));
    let range = QueryRange::parse(&START.to_string(), &(START + 3600).to_string(), "60s").unwrap();

    let report = LabelAggregator::new(client, owner_source)
        .extract(&range, AggregationMode::Job)
        .await
        .unwrap();
    energy.assert_async().await;
    owners.assert_async().await;

    let LabelTable::Job(rows) = &report.table else {
        panic!("expected job rows");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].workload_kind, WorkloadKind::Deployment);
    assert_eq!(rows[0].workload_name, "nginx");
    assert!((rows[0].total_energy_j - 3600.0).abs() < 1e-9);

    // Tables round-trip through files, as separate pipeline stages would
    let dir = tempfile::tempdir().unwrap();
    let labels_path = dir.path().join("labels.parquet");
    let features_path = dir.path().join("features.ndjson");
    let training_path = dir.path().join("out/train.parquet");

    write_labels(&labels_path, &report.table).unwrap();
    write_features(
        &features_path,
        &[FeatureRow {
            namespace: request.namespace.clone(),
            workload_kind: request.workload_kind.clone(),
            workload_name: request.workload_name.clone(),
            spec_hash: Some(request.spec_hash()),
            features: vec![
                request.containers[0].req_cpu_mcpu as f64,
                request.containers[0].req_mem_mib as f64,
            ],
        }],
    )
    .unwrap();

    let joined = DatasetJoiner::new().join(
        &read_features(&features_path).unwrap(),
        &read_labels(&labels_path).unwrap(),
    );
    assert_eq!(joined.status, JoinStatus::Matched);
    assert_eq!(joined.rows.len(), 1);
    assert_eq!(joined.rows[0].features, vec![100.0, 128.0]);
    assert_eq!(joined.rows[0].total_energy_j, Some(3600.0));

    write_training(&training_path, &joined.rows).unwrap();
    match read_table(&training_path).unwrap() {
        Table::Training(rows) => assert_eq!(rows, joined.rows),
        other => panic!("unexpected table {}", other.kind()),
    }
}
