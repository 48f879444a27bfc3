//! Biosignal Features - multi-resolution windowed feature extraction.
//!
//! This library sweeps a recording's EEG channel, and a heart-rate series
//! derived from its ECG channel, over a grid of epoch and Welch window sizes.
//! Every grid point produces one feature table; the tables are namespaced by
//! their parameters and merged into a single wide table per signal.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Biosignal Features                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Recording  │──▶│  Windowing  │──▶│  Features   │        │
//! │  │    (EDF)    │   │  (epochs)   │   │ (Welch PSD) │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                 ▲                  │               │
//! │         ▼                 │                  ▼               │
//! │  ┌─────────────┐          │          ┌─────────────┐        │
//! │  │ Heart rate  │──────────┘          │  Namespace  │        │
//! │  │  (R-peaks)  │                     │   + Merge   │──▶ CSV │
//! │  └─────────────┘                     └─────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use biosignal_features::{Config, EdfReader, Pipeline, RunRequest, SpectralFeatureExtractor};
//!
//! let config = Config::load().expect("Failed to load config");
//! let mut pipeline = Pipeline::new(config, EdfReader::new(), SpectralFeatureExtractor::new());
//!
//! let report = pipeline.run(&RunRequest::default()).expect("Run failed");
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod recording;
pub mod report;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use core::{
    derive_heart_rate, run_sweep, FeatureExtractor, MergedFeatureTable, RecordingStart, Signal,
    SignalType, SpectralFeatureExtractor, SweepGrid, SweepProgress, WindowSpec,
};
pub use error::{ConfigError, DerivationFailure, Error, InputError, Result};
pub use pipeline::{Pipeline, RunRequest, SignalSelection};
pub use recording::{EdfReader, RecordingReader};
pub use report::{RunReport, RunStats, SharedRunStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
