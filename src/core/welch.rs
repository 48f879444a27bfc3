//! Welch power spectral density estimate.
//!
//! Segments of `segment_len` samples with 50% overlap are mean-detrended,
//! Hann-windowed, transformed, and their periodograms averaged. The result
//! is a one-sided density in units²/Hz.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// One-sided power spectral density.
#[derive(Debug, Clone)]
pub struct Psd {
    /// Bin centre frequencies in Hz, starting at DC
    pub frequencies: Vec<f64>,
    /// Power density per bin
    pub power: Vec<f64>,
    /// Bin spacing in Hz
    pub resolution: f64,
}

impl Psd {
    /// Integrated power over `[low_hz, high_hz)`.
    ///
    /// Returns `NaN` when the band starts at or above the highest bin.
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        let nyquist = self.frequencies.last().copied().unwrap_or(0.0);
        if low_hz >= nyquist || high_hz <= low_hz {
            return f64::NAN;
        }
        self.frequencies
            .iter()
            .zip(&self.power)
            .filter(|&(&f, _)| f >= low_hz && f < high_hz)
            .map(|(_, &p)| p)
            .sum::<f64>()
            * self.resolution
    }

    /// Frequency of the largest bin in `[low_hz, high_hz)`.
    pub fn peak_frequency(&self, low_hz: f64, high_hz: f64) -> f64 {
        self.bins_in(low_hz, high_hz)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(f, _)| f)
            .unwrap_or(f64::NAN)
    }

    /// Frequency below which `fraction` of the power in `[low_hz, high_hz)` lies.
    pub fn spectral_edge(&self, fraction: f64, low_hz: f64, high_hz: f64) -> f64 {
        let total: f64 = self.bins_in(low_hz, high_hz).map(|(_, p)| p).sum();
        if total <= 0.0 {
            return f64::NAN;
        }
        let mut cumulative = 0.0;
        for (f, p) in self.bins_in(low_hz, high_hz) {
            cumulative += p;
            if cumulative >= fraction * total {
                return f;
            }
        }
        f64::NAN
    }

    /// Shannon entropy of the normalized spectrum in `[low_hz, high_hz)`, scaled to 0..1.
    pub fn spectral_entropy(&self, low_hz: f64, high_hz: f64) -> f64 {
        let bins: Vec<f64> = self.bins_in(low_hz, high_hz).map(|(_, p)| p).collect();
        let total: f64 = bins.iter().sum();
        if bins.len() < 2 || total <= 0.0 {
            return f64::NAN;
        }
        let entropy: f64 = bins
            .iter()
            .map(|&p| p / total)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.ln())
            .sum();
        entropy / (bins.len() as f64).ln()
    }

    fn bins_in(&self, low_hz: f64, high_hz: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies
            .iter()
            .zip(&self.power)
            .filter(move |&(&f, _)| f >= low_hz && f < high_hz)
            .map(|(&f, &p)| (f, p))
    }
}

/// Welch estimator for a fixed segment length.
pub struct Welch {
    segment_len: usize,
    step: usize,
    window: Vec<f64>,
    window_power: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl Welch {
    /// Create an estimator with `segment_len` samples per segment and 50% overlap.
    pub fn new(segment_len: usize) -> Self {
        let segment_len = segment_len.max(2);
        let window = hann_window(segment_len);
        let window_power = window.iter().map(|w| w * w).sum();
        let mut planner = FftPlanner::new();

        Self {
            segment_len,
            step: (segment_len - segment_len / 2).max(1),
            window,
            window_power,
            fft: planner.plan_fft_forward(segment_len),
        }
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    /// Estimate the PSD of `samples` taken at `sample_rate` Hz.
    ///
    /// Input shorter than one segment is estimated with a single segment
    /// covering the whole input.
    pub fn psd(&self, samples: &[f64], sample_rate: f64) -> Psd {
        if samples.len() < 2 {
            return Psd {
                frequencies: vec![0.0],
                power: vec![f64::NAN],
                resolution: sample_rate,
            };
        }
        if samples.len() < self.segment_len {
            return Welch::new(samples.len()).psd(samples, sample_rate);
        }

        let n = self.segment_len;
        let n_freqs = n / 2 + 1;
        let mut power = vec![0.0; n_freqs];
        let mut buffer = vec![Complex::new(0.0, 0.0); n];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut segments = 0usize;

        let mut start = 0;
        while start + n <= samples.len() {
            let segment = &samples[start..start + n];
            let mean = segment.iter().sum::<f64>() / n as f64;
            for (slot, (&s, &w)) in buffer.iter_mut().zip(segment.iter().zip(&self.window)) {
                *slot = Complex::new((s - mean) * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (acc, c) in power.iter_mut().zip(&buffer[..n_freqs]) {
                *acc += c.norm_sqr();
            }
            segments += 1;
            start += self.step;
        }

        let scale = 1.0 / (sample_rate * self.window_power * segments as f64);
        // Fold negative frequencies in; DC and (for even n) Nyquist appear once.
        let last_doubled = if n % 2 == 0 { n_freqs - 1 } else { n_freqs };
        for (k, p) in power.iter_mut().enumerate() {
            *p *= scale;
            if k > 0 && k < last_doubled {
                *p *= 2.0;
            }
        }

        let resolution = sample_rate / n as f64;
        Psd {
            frequencies: (0..n_freqs).map(|k| k as f64 * resolution).collect(),
            power,
            resolution,
        }
    }
}

/// Periodic Hann window.
fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f64, amplitude: f64, sample_rate: f64, secs: f64) -> Vec<f64> {
        let n = (sample_rate * secs) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_peak_at_sine_frequency() {
        let samples = sine(10.0, 1.0, 256.0, 16.0);
        let psd = Welch::new(256).psd(&samples, 256.0);

        assert_eq!(psd.resolution, 1.0);
        assert_eq!(psd.frequencies.len(), 129);
        assert_eq!(psd.peak_frequency(0.5, 45.0), 10.0);
    }

    #[test]
    fn test_total_power_matches_variance() {
        // A sine of amplitude A carries A^2 / 2 of power
        let samples = sine(12.0, 2.0, 256.0, 8.0);
        let psd = Welch::new(512).psd(&samples, 256.0);
        let total = psd.band_power(0.0, 128.0);
        assert_relative_eq!(total, 2.0, max_relative = 0.05);
    }

    #[test]
    fn test_band_above_nyquist_is_nan() {
        let samples = sine(1.0, 1.0, 16.0, 8.0);
        let psd = Welch::new(32).psd(&samples, 16.0);
        assert!(psd.band_power(30.0, 45.0).is_nan());
    }

    #[test]
    fn test_short_input_uses_single_segment() {
        let samples = sine(4.0, 1.0, 64.0, 1.0);
        let psd = Welch::new(256).psd(&samples, 64.0);
        assert_eq!(psd.frequencies.len(), 33);
        assert_eq!(psd.peak_frequency(0.5, 32.0), 4.0);
    }

    #[test]
    fn test_flat_spectrum_entropy_near_one() {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let noise: Vec<f64> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect();
        let psd = Welch::new(256).psd(&noise, 256.0);
        let tone = Welch::new(256).psd(&sine(20.0, 1.0, 256.0, 16.0), 256.0);

        assert!(psd.spectral_entropy(0.5, 128.0) > 0.8);
        assert!(tone.spectral_entropy(0.5, 128.0) < psd.spectral_entropy(0.5, 128.0));
    }
}
