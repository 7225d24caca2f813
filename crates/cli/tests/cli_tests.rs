//! CLI integration tests

use mockito::Matcher;
use serde_json::json;
use std::path::Path;
use std::process::{Command, Output};

const NGINX: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
  namespace: default
spec:
  template:
    spec:
      containers:
        - name: nginx
          image: nginx:1.25
          resources:
            requests:
              cpu: 100m
              memory: 128Mi
"#;

/// Run `pds` with a scratch HOME so no user config leaks in
fn pds(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pds"))
        .args(args)
        .env("HOME", home)
        .env_remove("PDS_PROMETHEUS_URL")
        .env_remove("KUBECONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute pds")
}

fn write_lines(path: &Path, rows: &[serde_json::Value]) {
    let body: String = rows.iter().map(|r| format!("{}\n", r)).collect();
    std::fs::write(path, body).unwrap();
}

#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = pds(dir.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("from-file"), "Should show from-file command");
    assert!(stdout.contains("labels"), "Should show labels command");
    assert!(stdout.contains("join"), "Should show join command");
    assert!(stdout.contains("show"), "Should show show command");
}

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = pds(dir.path(), &["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("pds"), "Should show binary name");
}

#[test]
fn test_labels_help_lists_owner_source() {
    let dir = tempfile::tempdir().unwrap();
    let output = pds(dir.path(), &["labels", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--owner-source"));
    assert!(stdout.contains("--mode"));
    assert!(stdout.contains("--prom-url"));
}

#[test]
fn test_from_file_writes_ndjson_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("nginx.yaml");
    std::fs::write(&manifest, NGINX).unwrap();

    let output = pds(dir.path(), &["from-file", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);

    let request: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(request["namespace"], "default");
    assert_eq!(request["workload_kind"], "Deployment");
    assert_eq!(request["workload_name"], "nginx");
    assert_eq!(request["containers"][0]["req_cpu_mcpu"], 100);
    assert_eq!(request["containers"][0]["req_mem_mib"], 128);
}

#[test]
fn test_from_file_appends_to_out() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("nginx.yaml");
    let out = dir.path().join("requests.ndjson");
    std::fs::write(&manifest, NGINX).unwrap();

    for _ in 0..2 {
        let output = pds(
            dir.path(),
            &["from-file", manifest.to_str().unwrap(), "--out", out.to_str().unwrap()],
        );
        assert!(output.status.success());
        assert!(output.stdout.is_empty());
    }

    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written.lines().count(), 2);
}

#[test]
fn test_from_file_rejects_unsupported_kind() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("svc.yaml");
    std::fs::write(
        &manifest,
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\nspec: {}\n",
    )
    .unwrap();

    let output = pds(dir.path(), &["from-file", manifest.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_join_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let features = dir.path().join("features.ndjson");
    let labels = dir.path().join("labels.ndjson");
    let out = dir.path().join("train.ndjson");

    write_lines(
        &features,
        &[
            json!({"namespace": "ns1", "workload_kind": "Deployment", "workload_name": "nginx", "features": [1.0, 2.0]}),
            json!({"namespace": "ns1", "workload_kind": "Deployment", "workload_name": "redis", "features": [3.0, 4.0]}),
        ],
    );
    write_lines(
        &labels,
        &[json!({
            "namespace": "ns1",
            "workload_kind": "Deployment",
            "workload_name": "nginx",
            "spec_hash": null,
            "pod_uid": null,
            "pod_count": 2,
            "avg_power_w": 5.0,
            "total_energy_j": 25.0,
        })],
    );

    let output = pds(
        dir.path(),
        &[
            "join",
            "--features",
            features.to_str().unwrap(),
            "--labels",
            labels.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["rows"], 1);
    assert_eq!(summary["matched_keys"], 1);

    let output = pds(dir.path(), &["show", out.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["workload_name"], "nginx");
    assert_eq!(rows[0]["features"], json!([1.0, 2.0]));
    assert_eq!(rows[0]["total_energy_j"], 25.0);
}

#[test]
fn test_join_key_mismatch_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let features = dir.path().join("features.ndjson");
    let labels = dir.path().join("labels.ndjson");
    let out = dir.path().join("train.ndjson");

    write_lines(
        &features,
        &[json!({"namespace": "ns1", "workload_kind": "Deployment", "workload_name": "nginx", "features": [1.0]})],
    );
    write_lines(
        &labels,
        &[json!({
            "namespace": "ns2",
            "workload_kind": "Job",
            "workload_name": "batch",
            "pod_uid": "batch-abcde",
            "pod_count": 1,
            "avg_power_w": null,
            "total_energy_j": 10.0,
        })],
    );

    let output = pds(
        dir.path(),
        &[
            "join",
            "--features",
            features.to_str().unwrap(),
            "--labels",
            labels.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ns1/nginx"));
    assert!(stderr.contains("ns2/batch"));
}

#[test]
fn test_join_with_empty_label_table_reports_no_labels() {
    let dir = tempfile::tempdir().unwrap();
    let features = dir.path().join("features.ndjson");
    let labels = dir.path().join("labels.ndjson");
    let out = dir.path().join("train.ndjson");

    write_lines(
        &features,
        &[json!({"namespace": "ns1", "workload_kind": "Deployment", "workload_name": "nginx", "features": [1.0]})],
    );
    std::fs::write(&labels, "").unwrap();

    let output = pds(
        dir.path(),
        &[
            "join",
            "--features",
            features.to_str().unwrap(),
            "--labels",
            labels.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["status"], "no_labels");
    assert_eq!(summary["rows"], 0);
}

#[test]
fn test_labels_against_mock_backend() {
    let mut server = mockito::Server::new();
    let start: i64 = 1_714_564_800;
    let matrix = |result: serde_json::Value| {
        json!({"status": "success", "data": {"resultType": "matrix", "result": result}}).to_string()
    };

    let values: Vec<serde_json::Value> = (0..=10)
        .map(|i| json!([start + i * 60, format!("{}", i * 100)]))
        .collect();
    let _energy = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::Regex("joules_total".into()))
        .with_header("content-type", "application/json")
        .with_body(matrix(json!([{
            "metric": {"container_namespace": "batch", "pod_name": "train-xk2p9"},
            "values": values,
        }])))
        .create();
    let _power = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::Regex("power_watt".into()))
        .with_header("content-type", "application/json")
        .with_body(matrix(json!([])))
        .create();
    let _owners = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::Regex("kube_pod_owner".into()))
        .with_header("content-type", "application/json")
        .with_body(matrix(json!([{
            "metric": {"namespace": "batch", "pod": "train-xk2p9", "owner_kind": "Job", "owner_name": "train"},
            "values": [[start, "1"]],
        }])))
        .create();
    let _job_owners = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::Regex("kube_job_owner".into()))
        .with_header("content-type", "application/json")
        .with_body(matrix(json!([])))
        .create();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("labels.ndjson");
    let start_arg = start.to_string();
    let end_arg = (start + 600).to_string();
    let output = pds(
        dir.path(),
        &[
            "labels",
            "--prom-url",
            &server.url(),
            "--owner-source",
            "metrics",
            "--mode",
            "job",
            "--start",
            &start_arg,
            "--end",
            &end_arg,
            "--step",
            "60s",
            "--out",
            out.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["rows"], 1);

    let written = std::fs::read_to_string(&out).unwrap();
    let row: serde_json::Value = serde_json::from_str(written.lines().next().unwrap()).unwrap();
    assert_eq!(row["namespace"], "batch");
    assert_eq!(row["workload_kind"], "Job");
    assert_eq!(row["workload_name"], "train");
    assert_eq!(row["total_energy_j"], 1000.0);
}

#[test]
fn test_labels_without_backend_url_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = pds(dir.path(), &["labels", "--owner-source", "metrics"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--prom-url"));
}
