//! Run statistics and the persisted run report.
//!
//! [`RunStats`] counts progress while a run is in flight and can be shared
//! with whoever renders it. When a run succeeds the pipeline writes a
//! [`RunReport`] as JSON next to the feature tables.

use crate::core::signal::SignalType;
use crate::core::windowing::WindowSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Live counters for the current run.
#[derive(Debug)]
pub struct RunStats {
    /// Sweep iterations finished across all signals
    iterations_completed: AtomicU64,
    /// Feature rows produced by those iterations
    rows_computed: AtomicU64,
    /// CSV files written
    files_written: AtomicU64,
    /// Run start time
    started_at: DateTime<Utc>,
}

/// Shared reference to run statistics.
pub type SharedRunStats = Arc<RunStats>;

impl RunStats {
    pub fn new() -> Self {
        Self {
            iterations_completed: AtomicU64::new(0),
            rows_computed: AtomicU64::new(0),
            files_written: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Record a finished sweep iteration.
    pub fn record_iteration(&self, rows: usize) {
        self.iterations_completed.fetch_add(1, Ordering::Relaxed);
        self.rows_computed.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Record a written output file.
    pub fn record_file_written(&self) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            iterations_completed: self.iterations_completed.load(Ordering::Relaxed),
            rows_computed: self.rows_computed.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            elapsed_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub iterations_completed: u64,
    pub rows_computed: u64,
    pub files_written: u64,
    pub elapsed_secs: f64,
}

/// Outcome of one signal's sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReport {
    pub signal_type: SignalType,
    /// Channel the signal was read from
    pub channel: String,
    pub sample_rate: f64,
    pub samples: usize,
    pub iterations: usize,
    pub rows: usize,
    pub columns: usize,
    /// Specs whose epoch did not fit in the signal
    pub empty_specs: Vec<WindowSpec>,
    /// Grid pairs not run because the Welch window exceeds the epoch
    #[serde(default)]
    pub skipped_specs: Vec<WindowSpec>,
    pub output: PathBuf,
    pub elapsed_secs: f64,
}

/// Persisted summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub version: String,
    pub input: PathBuf,
    pub labels: Option<PathBuf>,
    pub timezone: String,
    /// Resolved recording start, RFC 3339
    pub recording_start: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub signals: Vec<SignalReport>,
    pub stats: RunStatsSnapshot,
}

impl RunReport {
    /// Report for `signal_type`, if it ran.
    pub fn signal(&self, signal_type: SignalType) -> Option<&SignalReport> {
        self.signals.iter().find(|s| s.signal_type == signal_type)
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Run {}\n\
             - Input: {}\n\
             - Recording start: {} ({})\n\
             - Duration: {:.1} seconds\n",
            self.run_id,
            self.input.display(),
            self.recording_start,
            self.timezone,
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0,
        );
        for s in &self.signals {
            out.push_str(&format!(
                "\n{} ({} @ {} Hz):\n\
                 - Iterations: {} ({} empty, {} skipped)\n\
                 - Table: {} rows x {} columns\n\
                 - Output: {}\n",
                s.signal_type,
                s.channel,
                s.sample_rate,
                s.iterations,
                s.empty_specs.len(),
                s.skipped_specs.len(),
                s.rows,
                s.columns,
                s.output.display(),
            ));
        }
        out
    }

    /// Save the report as pretty JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load a previously saved report.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

/// `{output_dir}/{file_name}_run.json`
pub fn report_path(output_dir: &Path, file_name: &str) -> PathBuf {
    output_dir.join(format!("{file_name}_run.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let started_at = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            version: crate::VERSION.to_string(),
            input: PathBuf::from("recording.edf"),
            labels: None,
            timezone: "America/Los_Angeles".to_string(),
            recording_start: "2023-03-01T22:00:00-08:00".to_string(),
            started_at,
            finished_at: started_at + chrono::Duration::seconds(90),
            signals: vec![SignalReport {
                signal_type: SignalType::Eeg,
                channel: "EEG_ICA5".to_string(),
                sample_rate: 256.0,
                samples: 921_600,
                iterations: 25,
                rows: 1793,
                columns: 900,
                empty_specs: vec![WindowSpec::new(256, 1)],
                skipped_specs: Vec::new(),
                output: PathBuf::from("out/EEG/run_EEG.csv"),
                elapsed_secs: 90.0,
            }],
            stats: RunStatsSnapshot {
                iterations_completed: 25,
                rows_computed: 20_000,
                files_written: 1,
                elapsed_secs: 90.0,
            },
        }
    }

    #[test]
    fn test_stats_counters() {
        let stats = RunStats::new();
        stats.record_iteration(10);
        stats.record_iteration(5);
        stats.record_file_written();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.iterations_completed, 2);
        assert_eq!(snapshot.rows_computed, 15);
        assert_eq!(snapshot.files_written, 1);
    }

    #[test]
    fn test_summary_mentions_signals() {
        let summary = report().summary();
        assert!(summary.contains("EEG (EEG_ICA5 @ 256 Hz)"));
        assert!(summary.contains("1793 rows"));
        assert!(summary.contains("25 (1 empty, 0 skipped)"));
        assert!(summary.contains("Duration: 90.0 seconds"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("biosignal-report-{}", Uuid::new_v4()));
        let path = report_path(&dir, "run");
        let original = report();
        original.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, original.run_id);
        assert_eq!(loaded.signals[0].empty_specs, original.signals[0].empty_specs);
        assert!(loaded.signal(SignalType::HeartRate).is_none());
    }
}
