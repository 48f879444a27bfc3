//! Instantaneous heart rate from a raw ECG channel.
//!
//! R-peaks are located by a [`BeatDetector`], R-R intervals are converted to
//! beats per minute, implausible intervals are dropped, and the surviving
//! values are interpolated back onto the ECG sample grid. The resulting
//! [`Signal`] keeps the ECG's start time, sample rate, and length so that
//! windows over it line up with windows over the EEG.

use crate::core::signal::Signal;
use crate::error::DerivationFailure;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Intervals slower than this are treated as missed beats.
pub const MIN_PLAUSIBLE_BPM: f64 = 20.0;

/// Settings for heart-rate derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSettings {
    /// Half-width, in samples, of the neighbourhood searched for each R-peak
    pub search_radius: usize,
    /// Highest accepted instantaneous heart rate in bpm
    pub filter_threshold: f64,
}

impl Default for HeartRateSettings {
    fn default() -> Self {
        Self {
            search_radius: 200,
            filter_threshold: 200.0,
        }
    }
}

/// Locates R-peaks in an ECG trace.
pub trait BeatDetector: Send + Sync {
    /// Sample indices of detected beats, ascending.
    fn detect(&self, samples: &[f64], sample_rate: f64, search_radius: usize) -> Vec<usize>;
}

/// Amplitude-threshold R-peak detector.
///
/// Samples rising more than `threshold_std` standard deviations above the
/// mean start a candidate; the candidate is moved to the largest sample
/// within `search_radius` of it, and the next search resumes one radius
/// past the accepted peak.
#[derive(Debug, Clone, Copy)]
pub struct PeakBeatDetector {
    pub threshold_std: f64,
}

impl Default for PeakBeatDetector {
    fn default() -> Self {
        Self { threshold_std: 2.0 }
    }
}

impl BeatDetector for PeakBeatDetector {
    fn detect(&self, samples: &[f64], _sample_rate: f64, search_radius: usize) -> Vec<usize> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let std = (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        if std == 0.0 || !std.is_finite() {
            return Vec::new();
        }
        let threshold = mean + self.threshold_std * std;
        let radius = search_radius.max(1);

        let mut peaks: Vec<usize> = Vec::new();
        let mut i = 0;
        while i < n {
            if samples[i] <= threshold {
                i += 1;
                continue;
            }
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            let peak = (lo..hi)
                .max_by(|&a, &b| samples[a].total_cmp(&samples[b]))
                .unwrap_or(i);

            match peaks.last() {
                // Looking back can land on the previous beat's neighbourhood
                Some(&prev) if peak <= prev || peak - prev < radius => {
                    if samples[peak] > samples[prev] {
                        peaks.pop();
                        peaks.push(peak);
                    }
                }
                _ => peaks.push(peak),
            }
            i = peak.max(i) + radius;
        }
        peaks
    }
}

/// Derive heart rate with the default [`PeakBeatDetector`].
pub fn derive_heart_rate(
    ecg: &Signal,
    search_radius: usize,
    filter_threshold: f64,
) -> Result<Signal, DerivationFailure> {
    derive_heart_rate_with(&PeakBeatDetector::default(), ecg, search_radius, filter_threshold)
}

/// Derive heart rate using `detector` for beat detection.
pub fn derive_heart_rate_with(
    detector: &dyn BeatDetector,
    ecg: &Signal,
    search_radius: usize,
    filter_threshold: f64,
) -> Result<Signal, DerivationFailure> {
    if ecg.is_empty() {
        return Err(DerivationFailure::EmptySignal);
    }
    let sample_rate = ecg.sample_rate();

    let peaks = detector.detect(ecg.samples(), sample_rate, search_radius);
    if peaks.len() < 2 {
        return Err(DerivationFailure::TooFewBeats { found: peaks.len() });
    }

    // (position in samples, bpm) at the midpoint of each accepted interval
    let mut points: Vec<(f64, f64)> = Vec::with_capacity(peaks.len() - 1);
    let mut rejected = 0usize;
    for pair in peaks.windows(2) {
        let rr_secs = (pair[1] as f64 - pair[0] as f64) / sample_rate;
        let bpm = 60.0 / rr_secs;
        if rr_secs > 0.0 && (MIN_PLAUSIBLE_BPM..=filter_threshold).contains(&bpm) {
            points.push(((pair[0] + pair[1]) as f64 / 2.0, bpm));
        } else {
            rejected += 1;
        }
    }
    if points.is_empty() {
        return Err(DerivationFailure::NoValidIntervals {
            rejected,
            threshold: filter_threshold,
        });
    }
    debug!(
        beats = peaks.len(),
        accepted = points.len(),
        rejected,
        "Detected R-peaks"
    );

    let series = interpolate_onto_grid(&points, ecg.len());
    if series.iter().any(|v| !v.is_finite()) {
        return Err(DerivationFailure::NonFinite);
    }

    let heart_rate = Signal::new(series, sample_rate, ecg.start())
        .map_err(|e| DerivationFailure::AnchorMismatch(e.to_string()))?;
    verify_anchor(ecg, &heart_rate)?;

    info!(
        beats = peaks.len(),
        mean_bpm = points.iter().map(|p| p.1).sum::<f64>() / points.len() as f64,
        "Derived heart rate"
    );
    Ok(heart_rate)
}

/// The derived series must share the ECG's start, sample rate, and length.
fn verify_anchor(ecg: &Signal, heart_rate: &Signal) -> Result<(), DerivationFailure> {
    if heart_rate.start() != ecg.start() {
        return Err(DerivationFailure::AnchorMismatch(format!(
            "start {} != {}",
            heart_rate.start(),
            ecg.start()
        )));
    }
    if heart_rate.sample_rate() != ecg.sample_rate() {
        return Err(DerivationFailure::AnchorMismatch(format!(
            "sample rate {} != {}",
            heart_rate.sample_rate(),
            ecg.sample_rate()
        )));
    }
    if heart_rate.len() != ecg.len() {
        return Err(DerivationFailure::AnchorMismatch(format!(
            "length {} != {}",
            heart_rate.len(),
            ecg.len()
        )));
    }
    Ok(())
}

/// Linear interpolation of `(position, value)` points onto `0..len`,
/// holding the first and last values beyond the ends.
fn interpolate_onto_grid(points: &[(f64, f64)], len: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(len);
    let mut k = 0;
    for j in 0..len {
        let x = j as f64;
        while k + 1 < points.len() && points[k + 1].0 <= x {
            k += 1;
        }
        let (x0, y0) = points[k];
        let value = if x <= x0 || k + 1 == points.len() {
            y0
        } else {
            let (x1, y1) = points[k + 1];
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        };
        out.push(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::RecordingStart;
    use approx::assert_relative_eq;

    /// Gaussian R-waves at `bpm` on a slow baseline.
    fn synthetic_ecg(bpm: f64, sample_rate: f64, secs: f64) -> Signal {
        let n = (sample_rate * secs) as usize;
        let period = 60.0 / bpm;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                let phase = (t % period) - period / 2.0;
                let r_wave = (-(phase * phase) / (2.0 * 0.01f64.powi(2))).exp();
                r_wave + 0.05 * (2.0 * std::f64::consts::PI * 0.25 * t).sin()
            })
            .collect();
        let start = RecordingStart::from_epoch_seconds(1_700_000_000.0, chrono_tz::UTC).unwrap();
        Signal::new(samples, sample_rate, start).unwrap()
    }

    struct FixedBeats(Vec<usize>);

    impl BeatDetector for FixedBeats {
        fn detect(&self, _samples: &[f64], _sample_rate: f64, _radius: usize) -> Vec<usize> {
            self.0.clone()
        }
    }

    #[test]
    fn test_constant_60_bpm() {
        let ecg = synthetic_ecg(60.0, 250.0, 60.0);
        let hr = derive_heart_rate(&ecg, 50, 200.0).unwrap();

        assert_eq!(hr.len(), ecg.len());
        for &v in hr.samples() {
            assert_relative_eq!(v, 60.0, epsilon = 0.5);
        }
    }

    #[test]
    fn test_anchor_retained() {
        let ecg = synthetic_ecg(75.0, 500.0, 20.0);
        let hr = derive_heart_rate(&ecg, 100, 200.0).unwrap();

        assert_eq!(hr.start(), ecg.start());
        assert_eq!(hr.sample_rate(), ecg.sample_rate());
        assert_eq!(hr.len(), ecg.len());
    }

    #[test]
    fn test_flat_signal_fails() {
        let start = RecordingStart::from_epoch_seconds(0.0, chrono_tz::UTC).unwrap();
        let ecg = Signal::new(vec![0.0; 1000], 250.0, start).unwrap();
        assert_eq!(
            derive_heart_rate(&ecg, 50, 200.0).unwrap_err(),
            DerivationFailure::TooFewBeats { found: 0 }
        );
    }

    #[test]
    fn test_empty_signal_fails() {
        let start = RecordingStart::from_epoch_seconds(0.0, chrono_tz::UTC).unwrap();
        let ecg = Signal::new(Vec::new(), 250.0, start).unwrap();
        assert_eq!(
            derive_heart_rate(&ecg, 50, 200.0).unwrap_err(),
            DerivationFailure::EmptySignal
        );
    }

    #[test]
    fn test_filter_rejects_fast_intervals() {
        let ecg = synthetic_ecg(60.0, 100.0, 10.0);
        // 10 samples apart at 100 Hz is 600 bpm
        let detector = FixedBeats(vec![100, 110, 120]);
        let err = derive_heart_rate_with(&detector, &ecg, 5, 200.0).unwrap_err();
        assert!(matches!(
            err,
            DerivationFailure::NoValidIntervals { rejected: 2, .. }
        ));
    }

    #[test]
    fn test_interpolates_between_intervals() {
        let start = RecordingStart::from_epoch_seconds(0.0, chrono_tz::UTC).unwrap();
        let ecg = Signal::new(vec![0.0; 400], 100.0, start).unwrap();
        // 1.0 s then 0.5 s intervals: 60 bpm centred at 50, 120 bpm centred at 125
        let detector = FixedBeats(vec![0, 100, 150]);
        let hr = derive_heart_rate_with(&detector, &ecg, 5, 200.0).unwrap();

        assert_eq!(hr.samples()[0], 60.0);
        assert_eq!(hr.samples()[50], 60.0);
        assert_relative_eq!(hr.samples()[100], 100.0, epsilon = 1e-9);
        assert_eq!(hr.samples()[125], 120.0);
        assert_eq!(hr.samples()[399], 120.0);
    }

    #[test]
    fn test_detector_merges_close_candidates() {
        let mut samples = vec![0.0; 1000];
        samples[100] = 1.0;
        samples[110] = 2.0;
        samples[600] = 1.5;
        let peaks = PeakBeatDetector::default().detect(&samples, 250.0, 50);
        assert_eq!(peaks, vec![110, 600]);
    }
}
