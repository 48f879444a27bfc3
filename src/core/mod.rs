//! Core signal processing for feature sweeps.
//!
//! This module contains:
//! - Time anchoring and the loaded signal type
//! - Window management for slicing a signal into time-anchored epochs
//! - Feature computation from signal windows (Welch PSD, band powers)
//! - Heart-rate derivation from ECG
//! - Column namespacing, merging, and the epoch/Welch sweep

pub mod features;
pub mod heart_rate;
pub mod signal;
pub mod sweep;
pub mod table;
pub mod time;
pub mod welch;
pub mod windowing;

// Re-export commonly used types
pub use features::{
    FeatureExtractor, FeatureRow, FeatureTable, SpectralFeatureExtractor, WindowContext,
};
pub use heart_rate::{
    derive_heart_rate, derive_heart_rate_with, BeatDetector, HeartRateSettings, PeakBeatDetector,
};
pub use signal::{Signal, SignalType};
pub use sweep::{run_sweep, SweepGrid, SweepOptions, SweepOutput, SweepProgress};
pub use table::{merge, namespace_columns, MergedFeatureTable, NamespacedFeatureTable};
pub use time::{parse_timezone, RecordingStart, Timestamp, DEFAULT_TIMEZONE};
pub use windowing::{derive_step_size, window, WindowSpec};
