//! Run orchestration.
//!
//! A run validates its whole configuration, loads the requested channels,
//! derives heart rate from ECG, sweeps each signal over its grid, and
//! writes one merged CSV per signal plus a JSON run report:
//!
//! ```text
//! INIT ─▶ LOAD ─▶ (DERIVE) ─▶ SWEEP × N ─▶ MERGE ─▶ WRITE ─▶ DONE
//! ```
//!
//! The recording start is resolved once per run and shared by both signals,
//! so EEG and heart-rate rows land on the same clock.

use crate::config::Config;
use crate::core::features::FeatureExtractor;
use crate::core::heart_rate::{derive_heart_rate_with, BeatDetector, PeakBeatDetector};
use crate::core::signal::{Signal, SignalType};
use crate::core::sweep::{run_sweep, SweepGrid, SweepOptions, SweepProgress};
use crate::core::time::RecordingStart;
use crate::error::{Error, InputError, Result};
use crate::output::{output_path, write_merged_csv};
use crate::recording::RecordingReader;
use crate::report::{report_path, RunReport, RunStats, SharedRunStats, SignalReport};
use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_INPUT: &str = "data/raw/01_edf_data/test12_Wednesday_05_ALL_PROCESSED.edf";
pub const DEFAULT_OUTPUT_DIR: &str = "data/interim/feature_discovery/";
pub const DEFAULT_FILE_NAME: &str = "Wednesday_feature_discovery";
pub const DEFAULT_EEG_CHANNEL: &str = "EEG_ICA5";
pub const DEFAULT_ECG_CHANNEL: &str = "ECG_Raw_Ch1";

/// Which signals a run processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSelection {
    #[default]
    All,
    Eeg,
    Ecg,
}

impl SignalSelection {
    pub fn includes(self, signal_type: SignalType) -> bool {
        matches!(
            (self, signal_type),
            (SignalSelection::All, _)
                | (SignalSelection::Eeg, SignalType::Eeg)
                | (SignalSelection::Ecg, SignalType::HeartRate)
        )
    }
}

/// Inputs and outputs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Base name of the output files
    pub file_name: String,
    pub eeg_channel: String,
    pub ecg_channel: String,
    /// Optional 1 Hz label file; must exist when given
    pub labels: Option<PathBuf>,
    pub signals: SignalSelection,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            file_name: DEFAULT_FILE_NAME.to_string(),
            eeg_channel: DEFAULT_EEG_CHANNEL.to_string(),
            ecg_channel: DEFAULT_ECG_CHANNEL.to_string(),
            labels: None,
            signals: SignalSelection::All,
        }
    }
}

/// Callback receiving every sweep progress event.
pub type ProgressCallback = Box<dyn FnMut(&SweepProgress) + Send>;

/// Drives a run from recording to CSV.
pub struct Pipeline {
    config: Config,
    reader: Box<dyn RecordingReader>,
    extractor: Box<dyn FeatureExtractor>,
    detector: Box<dyn BeatDetector>,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
    stats: SharedRunStats,
}

impl Pipeline {
    pub fn new(
        config: Config,
        reader: impl RecordingReader + 'static,
        extractor: impl FeatureExtractor + 'static,
    ) -> Self {
        Self {
            config,
            reader: Box::new(reader),
            extractor: Box::new(extractor),
            detector: Box::new(PeakBeatDetector::default()),
            cancel: None,
            progress: None,
            stats: Arc::new(RunStats::new()),
        }
    }

    /// Replace the R-peak detector used for heart-rate derivation.
    pub fn with_detector(mut self, detector: impl BeatDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    /// Abort the run once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Receive a [`SweepProgress`] after every sweep iteration.
    pub fn with_progress(mut self, callback: impl FnMut(&SweepProgress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live counters for the current run.
    pub fn stats(&self) -> SharedRunStats {
        Arc::clone(&self.stats)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Execute `request`.
    pub fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        let started_at = Utc::now();

        // INIT: everything that can be checked without data
        self.config.validate()?;
        let tz = self.config.tz()?;
        if let Some(labels) = &request.labels {
            if !labels.exists() {
                return Err(InputError::Missing(labels.clone()).into());
            }
        }
        info!(
            input = %request.input.display(),
            output_dir = %request.output_dir.display(),
            signals = ?request.signals,
            timezone = %tz,
            "Starting feature run"
        );

        let mut start: Option<RecordingStart> = None;
        let mut signals = Vec::new();

        if request.signals.includes(SignalType::Eeg) {
            self.check_cancelled()?;
            let eeg = self.load(&request.input, &request.eeg_channel, false, tz, &mut start)?;
            signals.push(self.sweep_and_write(
                &eeg,
                SignalType::Eeg,
                &request.eeg_channel,
                request,
            )?);
        }

        if request.signals.includes(SignalType::HeartRate) {
            self.check_cancelled()?;
            let ecg = self.load(&request.input, &request.ecg_channel, true, tz, &mut start)?;

            let settings = self.config.heart_rate;
            let heart_rate = derive_heart_rate_with(
                self.detector.as_ref(),
                &ecg,
                settings.search_radius,
                settings.filter_threshold,
            )?;
            signals.push(self.sweep_and_write(
                &heart_rate,
                SignalType::HeartRate,
                &request.ecg_channel,
                request,
            )?);
        }

        let report = RunReport {
            run_id: Uuid::new_v4(),
            version: crate::VERSION.to_string(),
            input: request.input.clone(),
            labels: request.labels.clone(),
            timezone: tz.name().to_string(),
            recording_start: start.map(|s| s.to_string()).unwrap_or_default(),
            started_at,
            finished_at: Utc::now(),
            signals,
            stats: self.stats.snapshot(),
        };
        let path = report_path(&request.output_dir, &request.file_name);
        report.save(&path).map_err(|source| Error::Output {
            path: path.clone(),
            source,
        })?;
        info!(run_id = %report.run_id, report = %path.display(), "Run complete");

        Ok(report)
    }

    /// Read one channel, resolving the recording start on first use.
    fn load(
        &self,
        input: &Path,
        channel: &str,
        preload: bool,
        tz: Tz,
        start: &mut Option<RecordingStart>,
    ) -> Result<Signal> {
        let mut recording = self.reader.read(input, &[channel], preload)?;
        let data = recording.take_channel(channel)?;

        let anchor = match *start {
            Some(anchor) => anchor,
            None => {
                let resolved = recording.start.resolve(tz)?;
                info!(start = %resolved, "Resolved recording start");
                *start = Some(resolved);
                resolved
            }
        };
        info!(
            channel,
            sample_rate = data.sample_rate,
            samples = data.samples.len(),
            "Loaded channel"
        );

        Ok(data.into_signal(anchor)?)
    }

    fn sweep_and_write(
        &mut self,
        signal: &Signal,
        signal_type: SignalType,
        channel: &str,
        request: &RunRequest,
    ) -> Result<SignalReport> {
        let grid: &SweepGrid = match signal_type {
            SignalType::Eeg => &self.config.eeg,
            SignalType::HeartRate => &self.config.ecg,
        };
        let expected_minutes = grid.expected_minutes(signal_type);
        info!(
            signal = %signal_type,
            iterations = grid.specs().len(),
            expected_minutes,
            "Expected sweep duration"
        );
        if signal.duration_secs() < grid.epoch_sizes.iter().copied().min().unwrap_or(0) as f64 {
            warn!(
                signal = %signal_type,
                duration_secs = signal.duration_secs(),
                "Signal is shorter than every epoch size"
            );
        }

        let options = SweepOptions {
            workers: self.config.workers,
            cancel: self.cancel.clone(),
        };
        let stats = Arc::clone(&self.stats);
        let progress = &mut self.progress;
        let output = run_sweep(
            signal,
            signal_type,
            grid,
            self.extractor.as_ref(),
            &options,
            |p: &SweepProgress| {
                stats.record_iteration(p.rows);
                info!(
                    signal = %p.signal_type,
                    spec = %p.spec,
                    completed = p.completed,
                    total = p.total,
                    percent = p.percent(),
                    iteration_secs = p.iteration_elapsed.as_secs_f64(),
                    eta_secs = p.eta().as_secs(),
                    "Sweep progress"
                );
                if let Some(callback) = progress.as_mut() {
                    callback(p);
                }
            },
        )?;

        self.check_cancelled()?;
        let path = output_path(&request.output_dir, &request.file_name, signal_type);
        write_merged_csv(&path, &output.table)?;
        self.stats.record_file_written();

        Ok(SignalReport {
            signal_type,
            channel: channel.to_string(),
            sample_rate: signal.sample_rate(),
            samples: signal.len(),
            iterations: output.iterations,
            rows: output.table.row_count(),
            columns: output.table.column_count(),
            empty_specs: output.empty_specs,
            skipped_specs: output.skipped_specs,
            output: path,
            elapsed_secs: output.elapsed.as_secs_f64(),
        })
    }
}
