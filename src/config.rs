//! Configuration for biosignal feature runs.

use crate::core::heart_rate::HeartRateSettings;
use crate::core::sweep::SweepGrid;
use crate::core::time::{parse_timezone, DEFAULT_TIMEZONE};
pub use crate::error::ConfigError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for feature runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone the recording's wall-clock start is read in
    pub timezone: String,

    /// Epoch and Welch sizes swept over the EEG channel
    pub eeg: SweepGrid,

    /// Epoch and Welch sizes swept over the derived heart rate
    pub ecg: SweepGrid,

    /// R-peak search and plausibility filtering
    pub heart_rate: HeartRateSettings,

    /// Worker threads per sweep (1 runs iterations inline)
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            eeg: SweepGrid::eeg_default(),
            ecg: SweepGrid::ecg_default(),
            heart_rate: HeartRateSettings::default(),
            workers: 1,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biosignal-features")
            .join("config.json")
    }

    /// The configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.timezone)
    }

    /// Check every setting before any data is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        self.eeg.validate()?;
        self.ecg.validate()?;

        if self.heart_rate.search_radius == 0 {
            return Err(ConfigError::InvalidHeartRate(
                "search radius must be at least one sample".to_string(),
            ));
        }
        let threshold = self.heart_rate.filter_threshold;
        if !(threshold.is_finite() && threshold > crate::core::heart_rate::MIN_PLAUSIBLE_BPM) {
            return Err(ConfigError::InvalidHeartRate(format!(
                "filter threshold {threshold} bpm must exceed {} bpm",
                crate::core::heart_rate::MIN_PLAUSIBLE_BPM
            )));
        }
        Ok(())
    }
}
