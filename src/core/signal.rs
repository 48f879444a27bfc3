//! Loaded signal representation.

use crate::core::time::RecordingStart;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which physiological signal a sweep runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Raw EEG channel
    Eeg,
    /// Instantaneous heart rate derived from an ECG channel
    HeartRate,
}

impl SignalType {
    /// Infix used in namespaced column names.
    pub fn label(self) -> &'static str {
        match self {
            SignalType::Eeg => "EEG",
            SignalType::HeartRate => "HR",
        }
    }

    /// Output subdirectory and file suffix.
    pub fn output_name(self) -> &'static str {
        match self {
            SignalType::Eeg => "EEG",
            SignalType::HeartRate => "ECG",
        }
    }

    /// Rough wall-clock cost of one sweep iteration, used for the up-front estimate.
    pub fn nominal_minutes_per_iteration(self) -> f64 {
        match self {
            SignalType::Eeg => 3.0,
            SignalType::HeartRate => 1.5,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single channel of samples at a constant rate, anchored in absolute time.
#[derive(Debug, Clone)]
pub struct Signal {
    samples: Vec<f64>,
    sample_rate: f64,
    start: RecordingStart,
}

impl Signal {
    /// Create a signal. The sample rate must be positive and finite.
    pub fn new(
        samples: Vec<f64>,
        sample_rate: f64,
        start: RecordingStart,
    ) -> Result<Self, ConfigError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            samples,
            sample_rate,
            start,
        })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn start(&self) -> RecordingStart {
        self.start
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the signal in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sample_rate() {
        let start = RecordingStart::from_epoch_seconds(0.0, chrono_tz::UTC).unwrap();
        assert!(Signal::new(vec![0.0; 4], 0.0, start).is_err());
        assert!(Signal::new(vec![0.0; 4], f64::NAN, start).is_err());
    }

    #[test]
    fn test_duration() {
        let start = RecordingStart::from_epoch_seconds(0.0, chrono_tz::UTC).unwrap();
        let signal = Signal::new(vec![0.0; 512], 256.0, start).unwrap();
        assert_eq!(signal.duration_secs(), 2.0);
        assert_eq!(signal.len(), 512);
    }

    #[test]
    fn test_labels() {
        assert_eq!(SignalType::Eeg.label(), "EEG");
        assert_eq!(SignalType::HeartRate.label(), "HR");
        assert_eq!(SignalType::HeartRate.output_name(), "ECG");
    }
}
