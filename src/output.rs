//! CSV output of merged feature tables.
//!
//! Tables are written to a temporary sibling file and renamed into place
//! once complete, so a failed run never leaves a partial CSV behind.

use crate::core::signal::SignalType;
use crate::core::table::MergedFeatureTable;
use crate::error::{Error, Result};
use chrono::SecondsFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header of the timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// `{output_dir}/{EEG|ECG}/{file_name}_{EEG|ECG}.csv`
pub fn output_path(output_dir: &Path, file_name: &str, signal_type: SignalType) -> PathBuf {
    let name = signal_type.output_name();
    output_dir.join(name).join(format!("{file_name}_{name}.csv"))
}

fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => v.to_string(),
        _ => String::new(),
    }
}

/// Write `table` to `path` as CSV, creating parent directories.
///
/// Missing and `NaN` cells are written empty.
pub fn write_merged_csv(path: &Path, table: &MergedFeatureTable) -> Result<()> {
    let io_err = |source| Error::Output {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let written = write_rows(&tmp_path, table);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path).map_err(io_err)?;

    info!(
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count(),
        "Wrote feature table"
    );
    Ok(())
}

fn write_rows(path: &Path, table: &MergedFeatureTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = Vec::with_capacity(table.column_count() + 1);
    header.push(TIMESTAMP_COLUMN);
    header.extend(table.columns().iter().map(String::as_str));
    writer.write_record(&header)?;

    let mut record = Vec::with_capacity(table.column_count() + 1);
    for (timestamp, cells) in table.iter_rows() {
        record.clear();
        record.push(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false));
        record.extend(cells.iter().map(|&c| format_cell(c)));
        writer.write_record(&record)?;
    }

    writer.flush().map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{FeatureRow, FeatureTable};
    use crate::core::table::{merge, namespace_columns};
    use crate::core::time::RecordingStart;
    use crate::core::windowing::WindowSpec;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("biosignal-output-{}", uuid::Uuid::new_v4()))
    }

    fn merged() -> MergedFeatureTable {
        let tz = "America/Los_Angeles".parse().unwrap();
        let start = RecordingStart::from_epoch_seconds(1_677_736_800.5, tz).unwrap();
        let a = FeatureTable::new(
            vec!["mean".to_string()],
            vec![
                FeatureRow::new(start.at_offset_seconds(0.0), vec![1.5]),
                FeatureRow::new(start.at_offset_seconds(2.0), vec![f64::NAN]),
            ],
        );
        let b = FeatureTable::new(
            vec!["mean".to_string()],
            vec![FeatureRow::new(start.at_offset_seconds(0.0), vec![-2.0])],
        );
        merge(&[
            namespace_columns(a, WindowSpec::new(16, 1), SignalType::Eeg),
            namespace_columns(b, WindowSpec::new(32, 1), SignalType::Eeg),
        ])
        .unwrap()
    }

    #[test]
    fn test_output_path_layout() {
        let dir = Path::new("out");
        assert_eq!(
            output_path(dir, "Wednesday", SignalType::Eeg),
            PathBuf::from("out/EEG/Wednesday_EEG.csv")
        );
        assert_eq!(
            output_path(dir, "Wednesday", SignalType::HeartRate),
            PathBuf::from("out/ECG/Wednesday_ECG.csv")
        );
    }

    #[test]
    fn test_write_csv() {
        let dir = scratch_dir();
        let path = output_path(&dir, "run", SignalType::Eeg);
        write_merged_csv(&path, &merged()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "timestamp,EPOCH_16_WELCH_1_EEG_mean,EPOCH_32_WELCH_1_EEG_mean",
                "2023-03-01T22:00:00.500-08:00,1.5,-2",
                "2023-03-01T22:00:02.500-08:00,,",
            ]
        );

        // Only the final file remains
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_write_empty_table() {
        let dir = scratch_dir();
        let path = dir.join("empty.csv");
        write_merged_csv(&path, &MergedFeatureTable::default()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "timestamp");
    }
}
