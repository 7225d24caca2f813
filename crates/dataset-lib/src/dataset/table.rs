//! Label, feature and training table files
//!
//! Tables are Parquet unless the path ends in `.ndjson` or `.jsonl`, in
//! which case each row is one JSON object with the same column names.

use crate::error::TableError;
use crate::models::{FeatureRow, JobRow, LabelTable, TrainingRow, WindowRow, WorkloadKind};
use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Float64Builder, ListBuilder, StringArray, UInt32Array,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef, UInt32Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Ndjson,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ndjson") || ext.eq_ignore_ascii_case("jsonl") => {
                TableFormat::Ndjson
            }
            _ => TableFormat::Parquet,
        }
    }
}

/// Any table this crate reads, detected from its columns
#[derive(Debug, Clone, PartialEq)]
pub enum Table {
    Labels(LabelTable),
    Features(Vec<FeatureRow>),
    Training(Vec<TrainingRow>),
}

impl Table {
    pub fn kind(&self) -> &'static str {
        match self {
            Table::Labels(LabelTable::Window(_)) => "labels (window)",
            Table::Labels(LabelTable::Job(_)) => "labels (job)",
            Table::Features(_) => "features",
            Table::Training(_) => "training",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Table::Labels(table) => table.len(),
            Table::Features(rows) => rows.len(),
            Table::Training(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn write_labels(path: &Path, table: &LabelTable) -> Result<(), TableError> {
    match (TableFormat::from_path(path), table) {
        (TableFormat::Ndjson, LabelTable::Window(rows)) => write_ndjson(path, rows),
        (TableFormat::Ndjson, LabelTable::Job(rows)) => write_ndjson(path, rows),
        (TableFormat::Parquet, LabelTable::Window(rows)) => write_parquet(path, window_batch(rows)?),
        (TableFormat::Parquet, LabelTable::Job(rows)) => write_parquet(path, job_batch(rows)?),
    }
}

/// Read a label table; an empty NDJSON file is an empty window table
pub fn read_labels(path: &Path) -> Result<LabelTable, TableError> {
    match read_table_as(path, Some(Shape::Window))? {
        Table::Labels(table) => Ok(table),
        _ => Err(TableError::MissingColumn(
            "energy_step_j or total_energy_j".to_string(),
        )),
    }
}

pub fn write_features(path: &Path, rows: &[FeatureRow]) -> Result<(), TableError> {
    match TableFormat::from_path(path) {
        TableFormat::Ndjson => write_ndjson(path, rows),
        TableFormat::Parquet => write_parquet(path, feature_batch(rows)?),
    }
}

/// Read the externally produced feature table
///
/// Training tables are accepted too; only their feature columns are kept.
pub fn read_features(path: &Path) -> Result<Vec<FeatureRow>, TableError> {
    match read_table_as(path, Some(Shape::Features))? {
        Table::Features(rows) => Ok(rows),
        Table::Training(rows) => Ok(rows
            .into_iter()
            .map(|r| FeatureRow {
                namespace: r.namespace,
                workload_kind: r.workload_kind,
                workload_name: r.workload_name,
                spec_hash: r.spec_hash,
                features: r.features,
            })
            .collect()),
        Table::Labels(_) => Err(TableError::MissingColumn("features".to_string())),
    }
}

pub fn write_training(path: &Path, rows: &[TrainingRow]) -> Result<(), TableError> {
    match TableFormat::from_path(path) {
        TableFormat::Ndjson => write_ndjson(path, rows),
        TableFormat::Parquet => write_parquet(path, training_batch(rows)?),
    }
}

/// Read any table, detecting its shape from the columns
///
/// An empty NDJSON file has no columns to detect and is rejected.
pub fn read_table(path: &Path) -> Result<Table, TableError> {
    read_table_as(path, None)
}

fn read_table_as(path: &Path, when_empty: Option<Shape>) -> Result<Table, TableError> {
    match TableFormat::from_path(path) {
        TableFormat::Ndjson => read_ndjson_table(path, when_empty),
        TableFormat::Parquet => read_parquet_table(path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Window,
    Job,
    Features,
    Training,
}

fn detect_shape<'a>(columns: impl IntoIterator<Item = &'a str>) -> Result<Shape, TableError> {
    let columns: BTreeSet<&str> = columns.into_iter().collect();
    let has_features = columns.contains("features");
    let has_window = columns.contains("energy_step_j");
    let has_job = columns.contains("total_energy_j");

    match (has_features, has_window, has_job) {
        (true, true, _) | (true, _, true) => Ok(Shape::Training),
        (true, false, false) => Ok(Shape::Features),
        (false, _, true) => Ok(Shape::Job),
        (false, true, false) => Ok(Shape::Window),
        (false, false, false) => Err(TableError::MissingColumn(
            "features, energy_step_j or total_energy_j".to_string(),
        )),
    }
}

fn kind_of(value: &str) -> WorkloadKind {
    value.parse().unwrap_or_else(|never: Infallible| match never {})
}

// NDJSON

fn write_ndjson<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), TableError> {
    create_parent(path)?;
    let mut out = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote NDJSON table");
    Ok(())
}

fn read_ndjson_lines(path: &Path) -> Result<Vec<serde_json::Value>, TableError> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        values.push(serde_json::from_str(&line)?);
    }
    Ok(values)
}

fn from_values<T: DeserializeOwned>(values: Vec<serde_json::Value>) -> Result<Vec<T>, TableError> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(TableError::from))
        .collect()
}

fn read_ndjson_table(path: &Path, when_empty: Option<Shape>) -> Result<Table, TableError> {
    let values = read_ndjson_lines(path)?;
    let shape = match (values.first(), when_empty) {
        (Some(first), _) => {
            let first = first
                .as_object()
                .ok_or_else(|| TableError::MissingColumn("features".to_string()))?;
            detect_shape(first.keys().map(String::as_str))?
        }
        (None, Some(shape)) => shape,
        (None, None) => {
            return Err(TableError::MissingColumn(
                "features, energy_step_j or total_energy_j".to_string(),
            ))
        }
    };

    Ok(match shape {
        Shape::Window => Table::Labels(LabelTable::Window(from_values(values)?)),
        Shape::Job => Table::Labels(LabelTable::Job(from_values(values)?)),
        Shape::Features => Table::Features(from_values(values)?),
        Shape::Training => Table::Training(from_values(values)?),
    })
}

// Parquet

fn create_parent(path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<(), TableError> {
    create_parent(path)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    debug!(path = %path.display(), rows = batch.num_rows(), "Wrote Parquet table");
    Ok(())
}

fn features_field() -> Field {
    Field::new(
        "features",
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        false,
    )
}

fn key_fields() -> Vec<Field> {
    vec![
        Field::new("namespace", DataType::Utf8, false),
        Field::new("workload_kind", DataType::Utf8, false),
        Field::new("workload_name", DataType::Utf8, false),
        Field::new("spec_hash", DataType::Utf8, true),
    ]
}

fn key_columns<'a>(
    rows: impl Iterator<Item = (&'a str, &'a WorkloadKind, &'a str, Option<&'a str>)>,
) -> Vec<ArrayRef> {
    let mut namespaces = Vec::new();
    let mut kinds = Vec::new();
    let mut names = Vec::new();
    let mut hashes = Vec::new();
    for (ns, kind, name, hash) in rows {
        namespaces.push(ns);
        kinds.push(kind.as_str());
        names.push(name);
        hashes.push(hash);
    }
    vec![
        Arc::new(StringArray::from(namespaces)),
        Arc::new(StringArray::from(kinds)),
        Arc::new(StringArray::from(names)),
        Arc::new(StringArray::from(hashes)),
    ]
}

fn feature_array<'a>(vectors: impl Iterator<Item = &'a Vec<f64>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for vector in vectors {
        builder.values().append_slice(vector);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn batch(fields: Vec<Field>, columns: Vec<ArrayRef>) -> Result<RecordBatch, TableError> {
    let schema: SchemaRef = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn window_batch(rows: &[WindowRow]) -> Result<RecordBatch, TableError> {
    let mut fields = key_fields();
    fields.extend([
        Field::new("pod_uid", DataType::Utf8, false),
        Field::new("timestamp", DataType::Float64, false),
        Field::new("avg_power_w", DataType::Float64, true),
        Field::new("energy_step_j", DataType::Float64, false),
    ]);

    let mut columns = key_columns(rows.iter().map(|r| {
        (
            r.namespace.as_str(),
            &r.workload_kind,
            r.workload_name.as_str(),
            r.spec_hash.as_deref(),
        )
    }));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.pod_uid.as_str()),
    )));
    columns.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.timestamp),
    )));
    columns.push(Arc::new(Float64Array::from_iter(
        rows.iter().map(|r| r.avg_power_w),
    )));
    columns.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.energy_step_j),
    )));

    batch(fields, columns)
}

fn job_batch(rows: &[JobRow]) -> Result<RecordBatch, TableError> {
    let mut fields = key_fields();
    fields.extend([
        Field::new("pod_uid", DataType::Utf8, true),
        Field::new("pod_count", DataType::UInt32, false),
        Field::new("avg_power_w", DataType::Float64, true),
        Field::new("total_energy_j", DataType::Float64, false),
    ]);

    let mut columns = key_columns(rows.iter().map(|r| {
        (
            r.namespace.as_str(),
            &r.workload_kind,
            r.workload_name.as_str(),
            r.spec_hash.as_deref(),
        )
    }));
    columns.push(Arc::new(StringArray::from_iter(
        rows.iter().map(|r| r.pod_uid.as_deref()),
    )));
    columns.push(Arc::new(UInt32Array::from_iter_values(
        rows.iter().map(|r| r.pod_count),
    )));
    columns.push(Arc::new(Float64Array::from_iter(
        rows.iter().map(|r| r.avg_power_w),
    )));
    columns.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.total_energy_j),
    )));

    batch(fields, columns)
}

fn feature_batch(rows: &[FeatureRow]) -> Result<RecordBatch, TableError> {
    let mut fields = key_fields();
    fields.push(features_field());

    let mut columns = key_columns(rows.iter().map(|r| {
        (
            r.namespace.as_str(),
            &r.workload_kind,
            r.workload_name.as_str(),
            r.spec_hash.as_deref(),
        )
    }));
    columns.push(feature_array(rows.iter().map(|r| &r.features)));

    batch(fields, columns)
}

fn training_batch(rows: &[TrainingRow]) -> Result<RecordBatch, TableError> {
    let mut fields = key_fields();
    fields.extend([
        features_field(),
        Field::new("pod_uid", DataType::Utf8, true),
        Field::new("timestamp", DataType::Float64, true),
        Field::new("avg_power_w", DataType::Float64, true),
        Field::new("energy_step_j", DataType::Float64, true),
        Field::new("total_energy_j", DataType::Float64, true),
    ]);

    let mut columns = key_columns(rows.iter().map(|r| {
        (
            r.namespace.as_str(),
            &r.workload_kind,
            r.workload_name.as_str(),
            r.spec_hash.as_deref(),
        )
    }));
    columns.push(feature_array(rows.iter().map(|r| &r.features)));
    columns.push(Arc::new(StringArray::from_iter(
        rows.iter().map(|r| r.pod_uid.as_deref()),
    )));
    for values in [
        rows.iter().map(|r| r.timestamp).collect::<Float64Array>(),
        rows.iter().map(|r| r.avg_power_w).collect::<Float64Array>(),
        rows.iter().map(|r| r.energy_step_j).collect::<Float64Array>(),
        rows.iter().map(|r| r.total_energy_j).collect::<Float64Array>(),
    ] {
        columns.push(Arc::new(values));
    }

    batch(fields, columns)
}

fn read_parquet_table(path: &Path) -> Result<Table, TableError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let shape = detect_shape(
        builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str()),
    )?;
    let reader = builder.build()?;

    let mut table = match shape {
        Shape::Window => Table::Labels(LabelTable::Window(Vec::new())),
        Shape::Job => Table::Labels(LabelTable::Job(Vec::new())),
        Shape::Features => Table::Features(Vec::new()),
        Shape::Training => Table::Training(Vec::new()),
    };

    for batch in reader {
        let batch = batch?;
        match &mut table {
            Table::Labels(LabelTable::Window(rows)) => rows.extend(window_rows(&batch)?),
            Table::Labels(LabelTable::Job(rows)) => rows.extend(job_rows(&batch)?),
            Table::Features(rows) => rows.extend(feature_rows(&batch)?),
            Table::Training(rows) => rows.extend(training_rows(&batch)?),
        }
    }

    debug!(path = %path.display(), kind = table.kind(), rows = table.len(), "Read Parquet table");
    Ok(table)
}

fn type_error(name: &str, array: &dyn Array) -> TableError {
    TableError::ColumnType {
        column: name.to_string(),
        data_type: array.data_type().to_string(),
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, TableError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| TableError::MissingColumn(name.to_string()))
}

fn strings(name: &str, array: &ArrayRef) -> Result<Vec<Option<String>>, TableError> {
    let utf8 = cast(array, &DataType::Utf8).map_err(|_| type_error(name, array.as_ref()))?;
    Ok(utf8
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn required_strings(batch: &RecordBatch, name: &str) -> Result<Vec<String>, TableError> {
    Ok(strings(name, column(batch, name)?)?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

/// Absent columns read as all-null
fn optional_strings(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>, TableError> {
    match batch.column_by_name(name) {
        Some(array) => strings(name, array),
        None => Ok(vec![None; batch.num_rows()]),
    }
}

fn floats(name: &str, array: &ArrayRef) -> Result<Vec<Option<f64>>, TableError> {
    let values = cast(array, &DataType::Float64).map_err(|_| type_error(name, array.as_ref()))?;
    Ok(values.as_primitive::<Float64Type>().iter().collect())
}

fn optional_floats(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>, TableError> {
    match batch.column_by_name(name) {
        Some(array) => floats(name, array),
        None => Ok(vec![None; batch.num_rows()]),
    }
}

fn required_floats(batch: &RecordBatch, name: &str) -> Result<Vec<f64>, TableError> {
    Ok(floats(name, column(batch, name)?)?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

fn feature_vectors(batch: &RecordBatch, name: &str) -> Result<Vec<Vec<f64>>, TableError> {
    let array = column(batch, name)?;
    let to_vector = |item: Option<ArrayRef>| -> Result<Vec<f64>, TableError> {
        match item {
            Some(values) => Ok(floats(name, &values)?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect()),
            None => Ok(Vec::new()),
        }
    };

    match array.data_type() {
        DataType::List(_) => array.as_list::<i32>().iter().map(to_vector).collect(),
        DataType::LargeList(_) => array.as_list::<i64>().iter().map(to_vector).collect(),
        DataType::FixedSizeList(_, _) => array.as_fixed_size_list().iter().map(to_vector).collect(),
        _ => Err(type_error(name, array.as_ref())),
    }
}

struct Keys {
    namespace: Vec<String>,
    kind: Vec<String>,
    name: Vec<String>,
    spec_hash: Vec<Option<String>>,
}

impl Keys {
    /// Feature tables may carry the hash as `_spec_hash`
    fn read(batch: &RecordBatch) -> Result<Self, TableError> {
        let spec_hash = match batch.column_by_name("spec_hash") {
            Some(array) => strings("spec_hash", array)?,
            None => optional_strings(batch, "_spec_hash")?,
        };
        Ok(Self {
            namespace: required_strings(batch, "namespace")?,
            kind: required_strings(batch, "workload_kind")?,
            name: required_strings(batch, "workload_name")?,
            spec_hash,
        })
    }

    fn row(&self, i: usize) -> (String, WorkloadKind, String, Option<String>) {
        (
            self.namespace[i].clone(),
            kind_of(&self.kind[i]),
            self.name[i].clone(),
            self.spec_hash[i].clone(),
        )
    }
}

fn window_rows(batch: &RecordBatch) -> Result<Vec<WindowRow>, TableError> {
    let keys = Keys::read(batch)?;
    let pod_uid = required_strings(batch, "pod_uid")?;
    let timestamp = required_floats(batch, "timestamp")?;
    let power = optional_floats(batch, "avg_power_w")?;
    let energy = required_floats(batch, "energy_step_j")?;

    Ok((0..batch.num_rows())
        .map(|i| {
            let (namespace, workload_kind, workload_name, spec_hash) = keys.row(i);
            WindowRow {
                namespace,
                workload_kind,
                workload_name,
                spec_hash,
                pod_uid: pod_uid[i].clone(),
                timestamp: timestamp[i],
                avg_power_w: power[i],
                energy_step_j: energy[i],
            }
        })
        .collect())
}

fn job_rows(batch: &RecordBatch) -> Result<Vec<JobRow>, TableError> {
    let keys = Keys::read(batch)?;
    let pod_uid = optional_strings(batch, "pod_uid")?;
    let pod_count: Vec<u32> = match batch.column_by_name("pod_count") {
        Some(array) => cast(array, &DataType::UInt32)
            .map_err(|_| type_error("pod_count", array.as_ref()))?
            .as_primitive::<UInt32Type>()
            .iter()
            .map(|v| v.unwrap_or(0))
            .collect(),
        None => vec![0; batch.num_rows()],
    };
    let power = optional_floats(batch, "avg_power_w")?;
    let total = required_floats(batch, "total_energy_j")?;

    Ok((0..batch.num_rows())
        .map(|i| {
            let (namespace, workload_kind, workload_name, spec_hash) = keys.row(i);
            JobRow {
                namespace,
                workload_kind,
                workload_name,
                spec_hash,
                pod_uid: pod_uid[i].clone(),
                pod_count: pod_count[i],
                avg_power_w: power[i],
                total_energy_j: total[i],
            }
        })
        .collect())
}

fn feature_rows(batch: &RecordBatch) -> Result<Vec<FeatureRow>, TableError> {
    let keys = Keys::read(batch)?;
    let features = feature_vectors(batch, "features")?;

    Ok(features
        .into_iter()
        .enumerate()
        .map(|(i, features)| {
            let (namespace, workload_kind, workload_name, spec_hash) = keys.row(i);
            FeatureRow {
                namespace,
                workload_kind,
                workload_name,
                spec_hash,
                features,
            }
        })
        .collect())
}

fn training_rows(batch: &RecordBatch) -> Result<Vec<TrainingRow>, TableError> {
    let keys = Keys::read(batch)?;
    let features = feature_vectors(batch, "features")?;
    let pod_uid = optional_strings(batch, "pod_uid")?;
    let timestamp = optional_floats(batch, "timestamp")?;
    let power = optional_floats(batch, "avg_power_w")?;
    let step = optional_floats(batch, "energy_step_j")?;
    let total = optional_floats(batch, "total_energy_j")?;

    Ok(features
        .into_iter()
        .enumerate()
        .map(|(i, features)| {
            let (namespace, workload_kind, workload_name, spec_hash) = keys.row(i);
            TrainingRow {
                namespace,
                workload_kind,
                workload_name,
                spec_hash,
                features,
                pod_uid: pod_uid[i].clone(),
                timestamp: timestamp[i],
                avg_power_w: power[i],
                energy_step_j: step[i],
                total_energy_j: total[i],
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{FixedSizeListBuilder, Float32Builder};
    use tempfile::tempdir;

    fn window_row(pod: &str, ts: f64, step: f64) -> WindowRow {
        WindowRow {
            namespace: "default".to_string(),
            workload_kind: WorkloadKind::Deployment,
            workload_name: "nginx".to_string(),
            spec_hash: None,
            pod_uid: pod.to_string(),
            timestamp: ts,
            avg_power_w: Some(12.5),
            energy_step_j: step,
        }
    }

    fn job_row(name: &str, total: f64) -> JobRow {
        JobRow {
            namespace: "batch".to_string(),
            workload_kind: WorkloadKind::CronJob,
            workload_name: name.to_string(),
            spec_hash: None,
            pod_uid: None,
            pod_count: 3,
            avg_power_w: None,
            total_energy_j: total,
        }
    }

    fn feature_row(name: &str) -> FeatureRow {
        FeatureRow {
            namespace: "default".to_string(),
            workload_kind: WorkloadKind::Deployment,
            workload_name: name.to_string(),
            spec_hash: Some("0123456789abcdef".to_string()),
            features: vec![0.5, 1.0, 2.0],
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TableFormat::from_path(Path::new("out/labels.parquet")), TableFormat::Parquet);
        assert_eq!(TableFormat::from_path(Path::new("labels.NDJSON")), TableFormat::Ndjson);
        assert_eq!(TableFormat::from_path(Path::new("labels.jsonl")), TableFormat::Ndjson);
        assert_eq!(TableFormat::from_path(Path::new("labels")), TableFormat::Parquet);
    }

    #[test]
    fn test_window_labels_parquet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/labels.parquet");
        let table = LabelTable::Window(vec![
            window_row("nginx-a", 1714564860.0, 3.0),
            window_row("nginx-b", 1714564920.0, 0.0),
        ]);

        write_labels(&path, &table).unwrap();
        assert_eq!(read_labels(&path).unwrap(), table);
    }

    #[test]
    fn test_job_labels_ndjson_have_no_step_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.ndjson");
        let table = LabelTable::Job(vec![job_row("backup", 3600.0)]);

        write_labels(&path, &table).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"total_energy_j\":3600.0"));
        assert!(!text.contains("energy_step_j"));

        let read = read_labels(&path).unwrap();
        assert_eq!(read.mode(), crate::models::AggregationMode::Job);
        assert_eq!(read, table);
    }

    #[test]
    fn test_feature_table_is_not_a_label_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.parquet");
        write_features(&path, &[feature_row("nginx")]).unwrap();

        assert!(matches!(read_labels(&path), Err(TableError::MissingColumn(_))));
        assert_eq!(read_features(&path).unwrap(), vec![feature_row("nginx")]);
    }

    #[test]
    fn test_features_with_underscore_hash_and_f32_vectors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.parquet");

        let mut vectors = FixedSizeListBuilder::new(Float32Builder::new(), 2);
        vectors.values().append_slice(&[0.25, 4.0]);
        vectors.append(true);
        let vectors = vectors.finish();

        let schema = Arc::new(Schema::new(vec![
            Field::new("namespace", DataType::Utf8, false),
            Field::new("workload_kind", DataType::Utf8, false),
            Field::new("workload_name", DataType::Utf8, false),
            Field::new("_spec_hash", DataType::Utf8, true),
            Field::new("features", vectors.data_type().clone(), false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["default"])),
                Arc::new(StringArray::from(vec!["Deployment"])),
                Arc::new(StringArray::from(vec!["nginx"])),
                Arc::new(StringArray::from(vec![Some("abc")])),
                Arc::new(vectors),
            ],
        )
        .unwrap();
        write_parquet(&path, batch).unwrap();

        let rows = read_features(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].spec_hash.as_deref(), Some("abc"));
        assert_eq!(rows[0].features, vec![0.25, 4.0]);
    }

    #[test]
    fn test_ndjson_features_accept_underscore_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.jsonl");
        std::fs::write(
            &path,
            "{\"namespace\":\"default\",\"workload_kind\":\"Deployment\",\"workload_name\":\"nginx\",\"_spec_hash\":\"abc\",\"features\":[1.0]}\n\n",
        )
        .unwrap();

        let rows = read_features(&path).unwrap();
        assert_eq!(rows[0].spec_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_training_table_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.parquet");
        let rows = vec![TrainingRow {
            namespace: "default".to_string(),
            workload_kind: WorkloadKind::Job,
            workload_name: "etl".to_string(),
            spec_hash: None,
            features: vec![1.0, 2.0],
            pod_uid: Some("etl-x1".to_string()),
            timestamp: None,
            avg_power_w: Some(4.0),
            energy_step_j: None,
            total_energy_j: Some(42.0),
        }];

        write_training(&path, &rows).unwrap();
        let table = read_table(&path).unwrap();
        assert_eq!(table.kind(), "training");
        assert_eq!(table, Table::Training(rows));
    }

    #[test]
    fn test_unknown_table_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.ndjson");
        std::fs::write(&path, "{\"namespace\":\"default\"}\n").unwrap();
        assert!(matches!(read_table(&path), Err(TableError::MissingColumn(_))));
    }

    #[test]
    fn test_empty_ndjson_tables_read_back_empty() {
        let dir = tempdir().unwrap();
        let labels = dir.path().join("labels.ndjson");
        let features = dir.path().join("features.ndjson");

        write_labels(&labels, &LabelTable::Window(vec![])).unwrap();
        write_features(&features, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&labels).unwrap(), "");

        assert!(read_labels(&labels).unwrap().is_empty());
        assert!(read_features(&features).unwrap().is_empty());
        assert!(matches!(read_table(&labels), Err(TableError::MissingColumn(_))));
    }
}
