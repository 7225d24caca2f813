//! Dataset tables and the feature/label join

mod join;
mod table;

pub use join::{DatasetJoiner, JoinDiagnostics, JoinKey, JoinReport, JoinStatus};
pub use table::{
    read_features, read_labels, read_table, write_features, write_labels, write_training, Table,
    TableFormat,
};
