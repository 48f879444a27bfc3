//! Error types for feature extraction runs.
//!
//! Every fatal condition surfaces as one of the typed errors below and is
//! wrapped by [`Error`] when it reaches the run orchestrator. A signal that is
//! too short for an epoch is not an error: that window spec simply yields an
//! empty table.

use std::path::PathBuf;
use thiserror::Error;

/// Problems reading the recording or locating a requested channel.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file not found: {0}")]
    Missing(PathBuf),

    #[error("could not read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed recording {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("channel '{channel}' not present (available: {})", .available.join(", "))]
    ChannelNotFound {
        channel: String,
        available: Vec<String>,
    },

    #[error("recording start time cannot be represented: {0}")]
    InvalidStartTime(String),
}

/// Invalid configuration, raised before any windowing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("invalid window spec (epoch {epoch_size_sec}s, welch {welch_window_sec}s, step {step_size_sec}s): {reason}")]
    InvalidWindowSpec {
        epoch_size_sec: u32,
        welch_window_sec: u32,
        step_size_sec: u32,
        reason: String,
    },

    #[error("invalid sweep grid: {0}")]
    InvalidGrid(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid sample rate {0} Hz")]
    InvalidSampleRate(f64),

    #[error("invalid heart rate settings: {0}")]
    InvalidHeartRate(String),
}

/// Heart-rate derivation produced no usable series.
#[derive(Debug, Error, PartialEq)]
pub enum DerivationFailure {
    #[error("ECG signal is empty")]
    EmptySignal,

    #[error("only {found} beat(s) detected, at least two are required")]
    TooFewBeats { found: usize },

    #[error("all {rejected} R-R interval(s) rejected by the {threshold} bpm filter")]
    NoValidIntervals { rejected: usize, threshold: f64 },

    #[error("derived heart rate contains non-finite values")]
    NonFinite,

    #[error("derived heart rate lost the ECG time anchor: {0}")]
    AnchorMismatch(String),
}

/// Failures inside the per-window feature computation.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("extractor returned {found} values for {expected} feature names")]
    ColumnCountMismatch { expected: usize, found: usize },

    #[error("feature computation failed: {0}")]
    Computation(String),
}

/// Failures while merging namespaced tables.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("column '{0}' appears in more than one table")]
    DuplicateColumn(String),

    #[error("timestamp {timestamp} appears twice in table for {table}")]
    DuplicateTimestamp { table: String, timestamp: String },
}

/// Top-level error for a feature extraction run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("heart rate derivation failed: {0}")]
    Derivation(#[from] DerivationFailure),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("could not write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_not_found_lists_available() {
        let err = InputError::ChannelNotFound {
            channel: "EEG_ICA5".to_string(),
            available: vec!["ECG_Raw_Ch1".to_string(), "EMG".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("EEG_ICA5"));
        assert!(msg.contains("ECG_Raw_Ch1, EMG"));
    }

    #[test]
    fn test_derivation_wraps_into_run_error() {
        let err: Error = DerivationFailure::TooFewBeats { found: 1 }.into();
        assert!(matches!(err, Error::Derivation(_)));
        assert!(err.to_string().contains("heart rate derivation failed"));
    }
}
