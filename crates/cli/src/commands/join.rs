//! `join`: feature table × label table → training table

use anyhow::{Context, Result};
use colored::Colorize;
use dataset_lib::dataset::{read_features, read_labels, write_training};
use dataset_lib::{DatasetJoiner, JoinStatus};
use serde_json::json;
use std::path::Path;

use crate::output::{color_status, print_json, print_success, print_warning, OutputFormat};

/// Join and write the training table; the status is returned so the caller
/// can pick an exit code
pub fn run(
    features: &Path,
    labels: &Path,
    out: &Path,
    match_spec_hash: bool,
    format: OutputFormat,
) -> Result<JoinStatus> {
    let feature_rows = read_features(features)
        .with_context(|| format!("Failed to read feature table {}", features.display()))?;
    let label_table = read_labels(labels)
        .with_context(|| format!("Failed to read label table {}", labels.display()))?;

    let report = DatasetJoiner::new()
        .with_spec_hash(match_spec_hash)
        .join(&feature_rows, &label_table);

    write_training(out, &report.rows)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    let d = &report.diagnostics;
    match format {
        OutputFormat::Json => print_json(&json!({
            "status": report.status.as_str(),
            "rows": report.rows.len(),
            "feature_keys": d.feature_keys,
            "label_keys": d.label_keys,
            "matched_keys": d.matched_keys,
            "feature_samples": d.feature_samples,
            "label_samples": d.label_samples,
        }))?,
        OutputFormat::Table => {
            println!("{}", "Join".bold());
            println!("{}", "=".repeat(50));
            println!("Status:        {}", color_status(report.status.as_str()));
            println!("Feature keys:  {}", d.feature_keys);
            println!("Label keys:    {}", d.label_keys);
            println!("Matched keys:  {}", d.matched_keys);
            println!("Rows written:  {}", report.rows.len());
        }
    }

    match report.status {
        JoinStatus::Matched => {
            print_success(&format!("Training table written to {}", out.display()));
        }
        JoinStatus::Sparse => print_warning(&format!(
            "Only {} of {} keys matched; check that both tables cover the same workloads",
            d.matched_keys,
            d.feature_keys.min(d.label_keys)
        )),
        JoinStatus::KeyMismatch => {
            print_warning("No feature key matched any label key; keys are probably built inconsistently");
            print_warning(&format!("feature keys: {}", d.feature_samples.join(", ")));
            print_warning(&format!("label keys:   {}", d.label_samples.join(", ")));
        }
        JoinStatus::NoLabels => print_warning("Label table is empty; no workloads were measured"),
        JoinStatus::NoFeatures => print_warning("Feature table is empty"),
    }

    Ok(report.status)
}
