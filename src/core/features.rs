//! Feature computation from signal windows.
//!
//! A [`FeatureExtractor`] turns one epoch of samples into a fixed, ordered
//! set of named scalars. The windowing engine calls it once per epoch and
//! collects the results into a [`FeatureTable`].

use crate::core::signal::SignalType;
use crate::core::time::Timestamp;
use crate::core::welch::{Psd, Welch};
use crate::error::FeatureError;
use statrs::statistics::{Data, Median, OrderStatistics, Statistics};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Parameters an extractor sees alongside each window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowContext {
    pub signal_type: SignalType,
    pub sample_rate: f64,
    pub epoch_size_sec: u32,
    pub welch_window_sec: u32,
}

impl WindowContext {
    /// Welch segment length in samples.
    pub fn welch_samples(&self) -> usize {
        (f64::from(self.welch_window_sec) * self.sample_rate).round() as usize
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }
}

/// Per-window feature computation.
///
/// `extract` must return exactly one value per name from `feature_names`,
/// in the same order.
pub trait FeatureExtractor: Send + Sync {
    /// Ordered column names produced for windows described by `ctx`.
    fn feature_names(&self, ctx: &WindowContext) -> Vec<String>;

    /// Compute the features of one window.
    fn extract(&self, samples: &[f64], ctx: &WindowContext) -> Result<Vec<f64>, FeatureError>;
}

/// Features of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Absolute start time of the window
    pub timestamp: Timestamp,
    /// Values aligned with the owning table's columns
    pub values: Vec<f64>,
}

impl FeatureRow {
    pub fn new(timestamp: Timestamp, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }

    /// Look up a value by column name.
    pub fn get(&self, columns: &[String], name: &str) -> Option<f64> {
        columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Rows for one window spec, ordered by timestamp. Column names are bare.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>, rows: Vec<FeatureRow>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<FeatureRow>) {
        (self.columns, self.rows)
    }
}

/// EEG frequency bands in Hz, `[low, high)`.
pub const EEG_BANDS: [(&str, f64, f64); 6] = [
    ("delta", 0.5, 4.0),
    ("theta", 4.0, 8.0),
    ("alpha", 8.0, 12.0),
    ("sigma", 12.0, 16.0),
    ("beta", 16.0, 30.0),
    ("gamma", 30.0, 45.0),
];

/// Heart-rate variability bands in Hz, `[low, high)`.
pub const HR_BANDS: [(&str, f64, f64); 3] = [
    ("vlf", 0.0033, 0.04),
    ("lf", 0.04, 0.15),
    ("hf", 0.15, 0.4),
];

/// Upper edge of the EEG analysis range.
const EEG_MAX_HZ: f64 = 45.0;

/// Fraction of power used for the spectral edge frequency.
const SPECTRAL_EDGE_FRACTION: f64 = 0.95;

const STAT_NAMES: [&str; 9] = [
    "mean",
    "std",
    "min",
    "max",
    "median",
    "p25",
    "p75",
    "rms",
    "line_length",
];

/// Time-domain statistics plus Welch band powers.
///
/// EEG windows get absolute and relative power in the classic sleep bands,
/// a few band ratios, peak frequency, 95% spectral edge, and spectral
/// entropy. Heart-rate windows get VLF/LF/HF power, the LF/HF ratio, peak
/// frequency, and spectral entropy. Undefined values are `NaN`.
///
/// One Welch estimator is built per segment length and shared by every
/// window that uses it.
#[derive(Default)]
pub struct SpectralFeatureExtractor {
    estimators: Mutex<HashMap<usize, Arc<Welch>>>,
}

impl SpectralFeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn estimator(&self, segment_len: usize) -> Arc<Welch> {
        let mut estimators = self
            .estimators
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            estimators
                .entry(segment_len)
                .or_insert_with(|| Arc::new(Welch::new(segment_len))),
        )
    }
}

impl fmt::Debug for SpectralFeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralFeatureExtractor").finish_non_exhaustive()
    }
}

impl FeatureExtractor for SpectralFeatureExtractor {
    fn feature_names(&self, ctx: &WindowContext) -> Vec<String> {
        let mut names: Vec<String> = STAT_NAMES.iter().map(|s| s.to_string()).collect();
        match ctx.signal_type {
            SignalType::Eeg => {
                for (band, _, _) in EEG_BANDS {
                    names.push(format!("abs_{band}"));
                }
                for (band, _, _) in EEG_BANDS {
                    names.push(format!("rel_{band}"));
                }
                names.extend(
                    [
                        "delta_theta_ratio",
                        "theta_alpha_ratio",
                        "alpha_beta_ratio",
                        "peak_freq",
                        "sef95",
                        "spectral_entropy",
                    ]
                    .map(String::from),
                );
            }
            SignalType::HeartRate => {
                for (band, _, _) in HR_BANDS {
                    names.push(format!("{band}_power"));
                }
                names.extend(
                    ["lf_hf_ratio", "peak_freq", "spectral_entropy"].map(String::from),
                );
            }
        }
        names
    }

    fn extract(&self, samples: &[f64], ctx: &WindowContext) -> Result<Vec<f64>, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::Computation("empty window".to_string()));
        }

        let mut values = time_domain_stats(samples);
        let psd = self.estimator(ctx.welch_samples()).psd(samples, ctx.sample_rate);

        match ctx.signal_type {
            SignalType::Eeg => values.extend(eeg_spectral_features(&psd, ctx.nyquist())),
            SignalType::HeartRate => values.extend(hr_spectral_features(&psd)),
        }
        Ok(values)
    }
}

/// Statistics in the order of `STAT_NAMES`.
fn time_domain_stats(samples: &[f64]) -> Vec<f64> {
    let mut data = Data::new(samples.to_vec());
    let line_length: f64 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();

    vec![
        Statistics::mean(samples),
        Statistics::std_dev(samples),
        Statistics::min(samples),
        Statistics::max(samples),
        data.median(),
        data.lower_quartile(),
        data.upper_quartile(),
        Statistics::quadratic_mean(samples),
        line_length,
    ]
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        f64::NAN
    }
}

fn eeg_spectral_features(psd: &Psd, nyquist: f64) -> Vec<f64> {
    let upper = EEG_MAX_HZ.min(nyquist);
    let absolute: Vec<f64> = EEG_BANDS
        .iter()
        .map(|&(_, low, high)| psd.band_power(low, high.min(nyquist)))
        .collect();
    let total = psd.band_power(EEG_BANDS[0].1, upper);

    let mut values = absolute.clone();
    values.extend(absolute.iter().map(|&p| ratio(p, total)));

    let (delta, theta, alpha, beta) = (absolute[0], absolute[1], absolute[2], absolute[4]);
    values.push(ratio(delta, theta));
    values.push(ratio(theta, alpha));
    values.push(ratio(alpha, beta));
    values.push(psd.peak_frequency(EEG_BANDS[0].1, upper));
    values.push(psd.spectral_edge(SPECTRAL_EDGE_FRACTION, EEG_BANDS[0].1, upper));
    values.push(psd.spectral_entropy(EEG_BANDS[0].1, upper));
    values
}

fn hr_spectral_features(psd: &Psd) -> Vec<f64> {
    let powers: Vec<f64> = HR_BANDS
        .iter()
        .map(|&(_, low, high)| psd.band_power(low, high))
        .collect();
    let (low, high) = (HR_BANDS[0].1, HR_BANDS[2].2);

    let mut values = powers.clone();
    values.push(ratio(powers[1], powers[2]));
    values.push(psd.peak_frequency(low, high));
    values.push(psd.spectral_entropy(low, high));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ctx(signal_type: SignalType, sample_rate: f64, welch: u32) -> WindowContext {
        WindowContext {
            signal_type,
            sample_rate,
            epoch_size_sec: 16,
            welch_window_sec: welch,
        }
    }

    fn sine(freq: f64, sample_rate: f64, secs: f64) -> Vec<f64> {
        let n = (sample_rate * secs) as usize;
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_names_match_values() {
        let extractor = SpectralFeatureExtractor::new();
        for signal_type in [SignalType::Eeg, SignalType::HeartRate] {
            let ctx = ctx(signal_type, 256.0, 2);
            let names = extractor.feature_names(&ctx);
            let values = extractor.extract(&sine(10.0, 256.0, 16.0), &ctx).unwrap();
            assert_eq!(names.len(), values.len());
        }
    }

    #[test]
    fn test_names_unique() {
        let extractor = SpectralFeatureExtractor::new();
        let names = extractor.feature_names(&ctx(SignalType::Eeg, 256.0, 1));
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }

    #[test]
    fn test_alpha_sine_dominates_alpha_band() {
        let extractor = SpectralFeatureExtractor::new();
        let ctx = ctx(SignalType::Eeg, 256.0, 2);
        let names = extractor.feature_names(&ctx);
        let values = extractor.extract(&sine(10.0, 256.0, 16.0), &ctx).unwrap();
        let row = FeatureRow::new(chrono_tz::UTC.timestamp_opt(0, 0).unwrap(), values);

        assert!(row.get(&names, "rel_alpha").unwrap() > 0.9);
        assert_eq!(row.get(&names, "peak_freq"), Some(10.0));
        assert_relative_eq!(row.get(&names, "mean").unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(
            row.get(&names, "rms").unwrap(),
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_gamma_above_nyquist_is_nan() {
        let extractor = SpectralFeatureExtractor::new();
        let ctx = ctx(SignalType::Eeg, 32.0, 4);
        let names = extractor.feature_names(&ctx);
        let values = extractor.extract(&sine(2.0, 32.0, 16.0), &ctx).unwrap();
        let row = FeatureRow::new(chrono_tz::UTC.timestamp_opt(0, 0).unwrap(), values);

        assert!(row.get(&names, "abs_gamma").unwrap().is_nan());
        assert!(row.get(&names, "abs_delta").unwrap() > 0.0);
    }

    #[test]
    fn test_estimator_reused_per_segment_length() {
        let extractor = SpectralFeatureExtractor::new();
        let signal = sine(10.0, 256.0, 16.0);
        let two_secs = ctx(SignalType::Eeg, 256.0, 2);

        let bits = |v: Vec<f64>| v.into_iter().map(f64::to_bits).collect::<Vec<_>>();
        let first = bits(extractor.extract(&signal, &two_secs).unwrap());
        let second = bits(extractor.extract(&signal, &two_secs).unwrap());
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(
            &extractor.estimator(512),
            &extractor.estimator(512)
        ));

        extractor
            .extract(&signal, &ctx(SignalType::Eeg, 256.0, 4))
            .unwrap();
        assert_eq!(extractor.estimators.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_time_domain_stats() {
        let stats = time_domain_stats(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(stats[0], 3.0);
        assert_eq!(stats[2], 1.0);
        assert_eq!(stats[3], 5.0);
        assert_eq!(stats[4], 3.0);
        assert_eq!(stats[8], 4.0);
    }

    #[test]
    fn test_empty_window_rejected() {
        let extractor = SpectralFeatureExtractor::new();
        assert!(extractor
            .extract(&[], &ctx(SignalType::Eeg, 256.0, 1))
            .is_err());
    }
}
