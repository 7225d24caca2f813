//! `show`: print any dataset table

use anyhow::{Context, Result};
use dataset_lib::dataset::{read_table, Table};
use dataset_lib::LabelTable;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    format_energy, format_power, format_timestamp, print_info, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct WindowLabelRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Energy")]
    energy: String,
}

#[derive(Tabled)]
struct JobLabelRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Pods")]
    pods: u32,
    #[tabled(rename = "Avg power")]
    power: String,
    #[tabled(rename = "Total energy")]
    energy: String,
}

#[derive(Tabled)]
struct FeatureDisplayRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Spec hash")]
    spec_hash: String,
    #[tabled(rename = "Dims")]
    dims: usize,
}

#[derive(Tabled)]
struct TrainingDisplayRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Dims")]
    dims: usize,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Energy")]
    energy: String,
}

fn workload(kind: &impl std::fmt::Display, name: &str) -> String {
    format!("{}/{}", kind, name)
}

pub fn run(path: &Path, limit: usize, format: OutputFormat) -> Result<()> {
    let table = read_table(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let shown = table.len().min(limit);

    match format {
        OutputFormat::Json => match &table {
            Table::Labels(LabelTable::Window(rows)) => print_json(&rows[..shown])?,
            Table::Labels(LabelTable::Job(rows)) => print_json(&rows[..shown])?,
            Table::Features(rows) => print_json(&rows[..shown])?,
            Table::Training(rows) => print_json(&rows[..shown])?,
        },
        OutputFormat::Table => {
            match &table {
                Table::Labels(LabelTable::Window(rows)) => print_table(
                    &rows[..shown]
                        .iter()
                        .map(|r| WindowLabelRow {
                            namespace: r.namespace.clone(),
                            workload: workload(&r.workload_kind, &r.workload_name),
                            pod: r.pod_uid.clone(),
                            time: format_timestamp(r.timestamp),
                            power: format_power(r.avg_power_w),
                            energy: format_energy(r.energy_step_j),
                        })
                        .collect::<Vec<_>>(),
                ),
                Table::Labels(LabelTable::Job(rows)) => print_table(
                    &rows[..shown]
                        .iter()
                        .map(|r| JobLabelRow {
                            namespace: r.namespace.clone(),
                            workload: workload(&r.workload_kind, &r.workload_name),
                            pods: r.pod_count,
                            power: format_power(r.avg_power_w),
                            energy: format_energy(r.total_energy_j),
                        })
                        .collect::<Vec<_>>(),
                ),
                Table::Features(rows) => print_table(
                    &rows[..shown]
                        .iter()
                        .map(|r| FeatureDisplayRow {
                            namespace: r.namespace.clone(),
                            workload: workload(&r.workload_kind, &r.workload_name),
                            spec_hash: r.spec_hash.clone().unwrap_or_else(|| "-".to_string()),
                            dims: r.features.len(),
                        })
                        .collect::<Vec<_>>(),
                ),
                Table::Training(rows) => print_table(
                    &rows[..shown]
                        .iter()
                        .map(|r| TrainingDisplayRow {
                            namespace: r.namespace.clone(),
                            workload: workload(&r.workload_kind, &r.workload_name),
                            dims: r.features.len(),
                            power: format_power(r.avg_power_w),
                            energy: format_energy(
                                r.total_energy_j.or(r.energy_step_j).unwrap_or_default(),
                            ),
                        })
                        .collect::<Vec<_>>(),
                ),
            }
            print_info(&format!(
                "{}: {} of {} row(s) shown",
                table.kind(),
                shown,
                table.len()
            ));
        }
    }

    Ok(())
}
