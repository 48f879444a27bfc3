//! Window management for slicing a signal into time-anchored epochs.
//!
//! An epoch of `epoch_size_sec` seconds is placed every `step_size_sec`
//! seconds from the start of the signal. Epochs that would run past the end
//! of the signal are dropped, never padded. Each epoch is handed to a
//! [`FeatureExtractor`] and becomes one row of a [`FeatureTable`].

use crate::core::features::{FeatureExtractor, FeatureRow, FeatureTable, WindowContext};
use crate::core::signal::{Signal, SignalType};
use crate::error::{ConfigError, FeatureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Epochs at or above this length overlap, with the stride set to an eighth
/// of the epoch.
pub const OVERLAP_THRESHOLD_SECS: u32 = 8;

/// Stride between epoch starts when none is given explicitly.
///
/// Long epochs get a proportionally finer stride (`epoch / 8`) so that every
/// resolution in a sweep produces a comparable number of rows; a 256 s epoch
/// then yields about as many rows as a 16 s one would at a 2 s stride. Epochs
/// shorter than 8 s step by one second.
pub fn derive_step_size(epoch_size_sec: u32) -> u32 {
    if epoch_size_sec >= OVERLAP_THRESHOLD_SECS {
        epoch_size_sec / OVERLAP_THRESHOLD_SECS
    } else {
        1
    }
}

/// Number of samples spanned by `secs` seconds at `sample_rate` Hz.
fn samples_for(secs: u32, sample_rate: f64) -> usize {
    (f64::from(secs) * sample_rate).round() as usize
}

/// Epoch, inner (Welch) window, and stride, all in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Length of each analysis epoch
    pub epoch_size_sec: u32,
    /// Sub-window used by the spectral estimate inside an epoch
    pub welch_window_sec: u32,
    /// Stride between consecutive epoch starts
    pub step_size_sec: u32,
}

impl WindowSpec {
    /// Spec with the stride derived from the epoch size.
    pub fn new(epoch_size_sec: u32, welch_window_sec: u32) -> Self {
        Self {
            epoch_size_sec,
            welch_window_sec,
            step_size_sec: derive_step_size(epoch_size_sec),
        }
    }

    /// Spec with an explicit stride.
    pub fn with_step(epoch_size_sec: u32, welch_window_sec: u32, step_size_sec: u32) -> Self {
        Self {
            epoch_size_sec,
            welch_window_sec,
            step_size_sec,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidWindowSpec {
            epoch_size_sec: self.epoch_size_sec,
            welch_window_sec: self.welch_window_sec,
            step_size_sec: self.step_size_sec,
            reason: reason.into(),
        }
    }

    /// Check the sample-rate independent constraints.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.epoch_size_sec == 0 {
            return Err(self.invalid("epoch size must be positive"));
        }
        if self.welch_window_sec == 0 {
            return Err(self.invalid("welch window must be positive"));
        }
        if self.welch_window_sec > self.epoch_size_sec {
            return Err(self.invalid("welch window exceeds epoch size"));
        }
        if self.step_size_sec == 0 {
            return Err(self.invalid("step size must be at least 1s"));
        }
        Ok(())
    }

    /// Check the window sizes against a concrete sample rate.
    ///
    /// The Welch segment needs at least two samples for a spectrum.
    pub fn validate_for_rate(&self, sample_rate: f64) -> std::result::Result<(), ConfigError> {
        self.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        if self.welch_samples(sample_rate) < 2 {
            return Err(self.invalid(format!(
                "welch window covers fewer than 2 samples at {sample_rate} Hz"
            )));
        }
        if self.step_samples(sample_rate) == 0 {
            return Err(self.invalid(format!("step covers no samples at {sample_rate} Hz")));
        }
        Ok(())
    }

    pub fn epoch_samples(&self, sample_rate: f64) -> usize {
        samples_for(self.epoch_size_sec, sample_rate)
    }

    pub fn welch_samples(&self, sample_rate: f64) -> usize {
        samples_for(self.welch_window_sec, sample_rate)
    }

    pub fn step_samples(&self, sample_rate: f64) -> usize {
        samples_for(self.step_size_sec, sample_rate)
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch={}s welch={}s step={}s",
            self.epoch_size_sec, self.welch_window_sec, self.step_size_sec
        )
    }
}

/// Sample range `[start, end)` of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub start: usize,
    pub end: usize,
}

impl WindowBounds {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Start of the epoch in seconds from the signal start.
    pub fn offset_secs(&self, sample_rate: f64) -> f64 {
        self.start as f64 / sample_rate
    }
}

/// Number of complete epochs that fit in `len` samples.
pub fn expected_window_count(len: usize, sample_rate: f64, spec: &WindowSpec) -> usize {
    let epoch = spec.epoch_samples(sample_rate);
    let step = spec.step_samples(sample_rate);
    if epoch == 0 || step == 0 || len < epoch {
        return 0;
    }
    (len - epoch) / step + 1
}

/// Sample ranges of every complete epoch in a signal of `len` samples.
pub fn plan_windows(len: usize, sample_rate: f64, spec: &WindowSpec) -> Vec<WindowBounds> {
    let epoch = spec.epoch_samples(sample_rate);
    let step = spec.step_samples(sample_rate);
    let count = expected_window_count(len, sample_rate, spec);

    (0..count)
        .map(|i| {
            let start = i * step;
            WindowBounds {
                start,
                end: start + epoch,
            }
        })
        .collect()
}

/// Slice `signal` according to `spec` and compute one feature row per epoch.
///
/// A signal shorter than one epoch yields an empty table that still carries
/// the extractor's column names.
pub fn window(
    signal: &Signal,
    signal_type: SignalType,
    spec: &WindowSpec,
    extractor: &dyn FeatureExtractor,
) -> Result<FeatureTable> {
    let sample_rate = signal.sample_rate();
    spec.validate_for_rate(sample_rate)?;

    let ctx = WindowContext {
        signal_type,
        sample_rate,
        epoch_size_sec: spec.epoch_size_sec,
        welch_window_sec: spec.welch_window_sec,
    };
    let columns = extractor.feature_names(&ctx);
    let bounds = plan_windows(signal.len(), sample_rate, spec);

    debug!(
        %spec,
        signal = %signal_type,
        windows = bounds.len(),
        columns = columns.len(),
        "Windowing signal"
    );

    let samples = signal.samples();
    let start = signal.start();
    let mut rows = Vec::with_capacity(bounds.len());

    for b in &bounds {
        let values = extractor.extract(&samples[b.start..b.end], &ctx)?;
        if values.len() != columns.len() {
            return Err(FeatureError::ColumnCountMismatch {
                expected: columns.len(),
                found: values.len(),
            }
            .into());
        }
        let timestamp = start.at_sample(b.start, sample_rate);
        trace!(start = b.start, %timestamp, "Computed window");
        rows.push(FeatureRow::new(timestamp, values));
    }

    Ok(FeatureTable::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::RecordingStart;
    use chrono::Duration;

    /// Emits the window mean and length so rows can be checked against input.
    struct MeanExtractor;

    impl FeatureExtractor for MeanExtractor {
        fn feature_names(&self, _ctx: &WindowContext) -> Vec<String> {
            vec!["mean".to_string(), "len".to_string()]
        }

        fn extract(
            &self,
            samples: &[f64],
            _ctx: &WindowContext,
        ) -> std::result::Result<Vec<f64>, FeatureError> {
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            Ok(vec![mean, samples.len() as f64])
        }
    }

    struct BrokenExtractor;

    impl FeatureExtractor for BrokenExtractor {
        fn feature_names(&self, _ctx: &WindowContext) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn extract(
            &self,
            _samples: &[f64],
            _ctx: &WindowContext,
        ) -> std::result::Result<Vec<f64>, FeatureError> {
            Ok(vec![1.0])
        }
    }

    fn ramp(len_secs: usize, sample_rate: f64) -> Signal {
        let n = (len_secs as f64 * sample_rate) as usize;
        let start = RecordingStart::from_epoch_seconds(1_700_000_000.0, chrono_tz::UTC).unwrap();
        Signal::new((0..n).map(|i| i as f64).collect(), sample_rate, start).unwrap()
    }

    #[test]
    fn test_step_size_derivation() {
        assert_eq!(derive_step_size(1), 1);
        assert_eq!(derive_step_size(7), 1);
        assert_eq!(derive_step_size(8), 1);
        assert_eq!(derive_step_size(9), 1);
        assert_eq!(derive_step_size(16), 2);
        assert_eq!(derive_step_size(64), 8);
        assert_eq!(derive_step_size(512), 64);
    }

    #[test]
    fn test_spec_validation() {
        assert!(WindowSpec::new(16, 1).validate().is_ok());
        assert!(WindowSpec::new(16, 16).validate().is_ok());
        assert!(WindowSpec::new(16, 32).validate().is_err());
        assert!(WindowSpec::new(0, 0).validate().is_err());
        assert!(WindowSpec::with_step(16, 1, 0).validate().is_err());
        // One-sample Welch segment at 1 Hz
        assert!(WindowSpec::new(16, 1).validate_for_rate(1.0).is_err());
        assert!(WindowSpec::new(16, 2).validate_for_rate(1.0).is_ok());
    }

    #[test]
    fn test_row_count_formula() {
        for (len_sec, epoch, step) in [(100, 64, 8), (3600, 16, 2), (30, 16, 1), (16, 16, 2)] {
            let spec = WindowSpec::with_step(epoch, 1, step);
            let expected = (len_sec - epoch as usize) / step as usize + 1;
            assert_eq!(expected_window_count(len_sec * 4, 4.0, &spec), expected);
        }
    }

    #[test]
    fn test_short_signal_yields_empty_table() {
        let signal = ramp(10, 4.0);
        let table = window(&signal, SignalType::Eeg, &WindowSpec::new(16, 1), &MeanExtractor)
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns(), &["mean".to_string(), "len".to_string()]);
    }

    #[test]
    fn test_windows_never_pass_signal_end() {
        let signal = ramp(100, 1.0);
        let spec = WindowSpec::with_step(64, 2, 8);
        let bounds = plan_windows(signal.len(), 1.0, &spec);

        assert_eq!(bounds.len(), 5);
        let last = bounds.last().unwrap();
        assert!(last.offset_secs(1.0) <= 36.0);
        assert!(last.end <= signal.len());
        assert!(bounds.iter().all(|b| b.len() == 64));
    }

    #[test]
    fn test_window_rows_anchored_to_start() {
        let signal = ramp(40, 2.0);
        let spec = WindowSpec::new(16, 1);
        let table = window(&signal, SignalType::Eeg, &spec, &MeanExtractor).unwrap();

        // (40 - 16) / 2 + 1
        assert_eq!(table.len(), 13);
        let start = signal.start().datetime();
        for (i, row) in table.rows().iter().enumerate() {
            assert_eq!(row.timestamp, start + Duration::seconds(2 * i as i64));
            assert_eq!(row.get(table.columns(), "len"), Some(32.0));
        }
        // Mean of samples 4..36 of the ramp
        assert_eq!(table.rows()[1].values[0], 19.5);
    }

    #[test]
    fn test_column_count_mismatch_is_error() {
        let signal = ramp(20, 2.0);
        let result = window(&signal, SignalType::Eeg, &WindowSpec::new(16, 1), &BrokenExtractor);
        assert!(matches!(
            result,
            Err(crate::error::Error::Feature(FeatureError::ColumnCountMismatch { .. }))
        ));
    }
}
