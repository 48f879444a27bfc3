//! Recording access.
//!
//! A [`RecordingReader`] extracts named channels and the raw start time from
//! a multi-channel recording file. The start time is returned exactly as the
//! file stores it; turning it into an absolute instant is the caller's job
//! via [`RawStartTime::resolve`].

pub mod edf;

pub use edf::{write_edf, EdfReader, EdfSignal};

use crate::core::signal::Signal;
use crate::core::time::RecordingStart;
use crate::error::{ConfigError, InputError};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use serde::Serialize;
use std::path::Path;

/// Start time as stored in the recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawStartTime {
    /// Seconds since the Unix epoch, timezone-independent
    EpochSeconds(f64),
    /// Wall-clock time without an offset
    Naive(NaiveDateTime),
}

impl RawStartTime {
    /// Anchor the raw start in `tz`.
    pub fn resolve(&self, tz: Tz) -> Result<RecordingStart, InputError> {
        match *self {
            RawStartTime::EpochSeconds(secs) => RecordingStart::from_epoch_seconds(secs, tz),
            RawStartTime::Naive(naive) => {
                RecordingStart::from_naive_datetime_assumed_local(naive, tz)
            }
        }
    }
}

/// Samples of one channel in physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelData {
    pub name: String,
    pub sample_rate: f64,
    /// Physical dimension, e.g. `uV`
    pub unit: String,
    pub samples: Vec<f64>,
}

impl ChannelData {
    /// Anchor the channel at `start`.
    pub fn into_signal(self, start: RecordingStart) -> Result<Signal, ConfigError> {
        Signal::new(self.samples, self.sample_rate, start)
    }
}

/// Channel metadata without samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub sample_rate: f64,
    pub unit: String,
    pub sample_count: usize,
}

/// Channels read from one recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub channels: Vec<ChannelData>,
    pub start: RawStartTime,
}

impl Recording {
    /// Remove and return the channel named `name`.
    pub fn take_channel(&mut self, name: &str) -> Result<ChannelData, InputError> {
        match self.channels.iter().position(|c| c.name == name) {
            Some(i) => Ok(self.channels.remove(i)),
            None => Err(InputError::ChannelNotFound {
                channel: name.to_string(),
                available: self.channels.iter().map(|c| c.name.clone()).collect(),
            }),
        }
    }
}

/// Reads channels from a recording file.
pub trait RecordingReader: Send + Sync {
    /// Read `channels` from `path`.
    ///
    /// With `preload` the whole file is read into memory first; otherwise
    /// data is streamed. Every requested channel must exist.
    fn read(&self, path: &Path, channels: &[&str], preload: bool)
        -> Result<Recording, InputError>;

    /// Describe every signal channel in `path`.
    fn list_channels(&self, path: &Path) -> Result<Vec<ChannelInfo>, InputError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_resolve_naive_and_epoch_agree() {
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2023, 3, 1)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let a = RawStartTime::Naive(naive).resolve(tz).unwrap();
        let b = RawStartTime::EpochSeconds(1_677_736_800.0).resolve(tz).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_take_channel() {
        let mut recording = Recording {
            channels: vec![ChannelData {
                name: "EEG_ICA5".to_string(),
                sample_rate: 256.0,
                unit: "uV".to_string(),
                samples: vec![1.0, 2.0],
            }],
            start: RawStartTime::EpochSeconds(0.0),
        };

        match recording.take_channel("ECG_Raw_Ch1") {
            Err(InputError::ChannelNotFound { available, .. }) => {
                assert_eq!(available, vec!["EEG_ICA5".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        let eeg = recording.take_channel("EEG_ICA5").unwrap();
        assert_eq!(eeg.samples, vec![1.0, 2.0]);
        assert!(recording.channels.is_empty());
    }
}
