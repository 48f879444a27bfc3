//! Column namespacing and timestamp-aligned merging.
//!
//! Each per-spec [`FeatureTable`] has its columns prefixed with the epoch
//! size, Welch size, and signal label that produced it, so tables from one
//! sweep never share a column name. [`merge`] then performs an outer join on
//! window timestamp: the merged index is the union of all input timestamps
//! and a cell is filled only where its source table had a row.

use crate::core::features::{FeatureRow, FeatureTable};
use crate::core::signal::SignalType;
use crate::core::time::Timestamp;
use crate::core::windowing::WindowSpec;
use crate::error::MergeError;
use std::collections::{BTreeMap, HashSet};

/// Namespaced name of feature `feature` produced by one sweep iteration.
pub fn namespaced_column(
    epoch_size: u32,
    welch_size: u32,
    signal_type: SignalType,
    feature: &str,
) -> String {
    format!(
        "EPOCH_{epoch_size}_WELCH_{welch_size}_{}_{feature}",
        signal_type.label()
    )
}

/// A feature table whose columns carry their producing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespacedFeatureTable {
    pub spec: WindowSpec,
    pub signal_type: SignalType,
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl NamespacedFeatureTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn describe(&self) -> String {
        format!("{} {}", self.signal_type, self.spec)
    }
}

/// Rename every column `x` to `EPOCH_{epoch}_WELCH_{welch}_{label}_{x}`.
pub fn namespace_columns(
    table: FeatureTable,
    spec: WindowSpec,
    signal_type: SignalType,
) -> NamespacedFeatureTable {
    let (columns, rows) = table.into_parts();
    let columns = columns
        .iter()
        .map(|c| namespaced_column(spec.epoch_size_sec, spec.welch_window_sec, signal_type, c))
        .collect();

    NamespacedFeatureTable {
        spec,
        signal_type,
        columns,
        rows,
    }
}

/// Column-wise union of namespaced tables, indexed by timestamp.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedFeatureTable {
    columns: Vec<String>,
    index: Vec<Timestamp>,
    cells: Vec<Vec<Option<f64>>>,
}

impl MergedFeatureTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Sorted, de-duplicated timestamps.
    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    /// Row-major cells; `None` marks a timestamp the column's table did not cover.
    pub fn cells(&self) -> &[Vec<Option<f64>>] {
        &self.cells
    }

    pub fn row_count(&self) -> usize {
        self.index.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column in index order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let i = self.column_index(name)?;
        Some(self.cells.iter().map(|row| row[i]).collect())
    }

    /// Iterate `(timestamp, cells)` pairs.
    pub fn iter_rows(&self) -> impl Iterator<Item = (&Timestamp, &[Option<f64>])> {
        self.index.iter().zip(self.cells.iter().map(Vec::as_slice))
    }
}

/// Outer-join `tables` on timestamp.
///
/// Columns appear in input order, each table's own order preserved. Gaps are
/// `None`, never zero.
pub fn merge(tables: &[NamespacedFeatureTable]) -> Result<MergedFeatureTable, MergeError> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    let mut offsets = Vec::with_capacity(tables.len());
    for table in tables {
        offsets.push(columns.len());
        for c in table.columns() {
            if !seen.insert(c.as_str()) {
                return Err(MergeError::DuplicateColumn(c.clone()));
            }
            columns.push(c.clone());
        }
    }
    let width = columns.len();

    let mut joined: BTreeMap<Timestamp, Vec<Option<f64>>> = BTreeMap::new();
    for (table, &offset) in tables.iter().zip(&offsets) {
        let mut table_timestamps = HashSet::with_capacity(table.len());
        for row in table.rows() {
            if !table_timestamps.insert(row.timestamp) {
                return Err(MergeError::DuplicateTimestamp {
                    table: table.describe(),
                    timestamp: row.timestamp.to_rfc3339(),
                });
            }
            let cells = joined
                .entry(row.timestamp)
                .or_insert_with(|| vec![None; width]);
            for (slot, &value) in cells[offset..].iter_mut().zip(&row.values) {
                *slot = Some(value);
            }
        }
    }

    let (index, cells) = joined.into_iter().unzip();
    Ok(MergedFeatureTable {
        columns,
        index,
        cells,
    })
}
