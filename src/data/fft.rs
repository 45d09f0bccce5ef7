//! One-sided magnitude spectrum and peak picking.
//!
//! The estimator treats the analysed samples as uniformly spaced at `dt`. Input
//! jitter therefore smears the spectrum; the mean spacing is the best single
//! value available without resampling.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Peak magnitudes at or below this fraction of the signal scale count as flat.
const FLAT_SPECTRUM_TOLERANCE: f64 = 1e-9;

/// Magnitude spectrum for bins `0..=n/2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// Amplitude-scaled magnitude for each bin.
    pub magnitudes: Vec<f64>,
    /// Scale of the input signal, used to decide whether the spectrum is flat.
    scale: f64,
}

impl Spectrum {
    /// Number of bins, DC included.
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    /// Whether the spectrum has no bins at all.
    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Frequency of the strongest non-DC bin.
    ///
    /// Ties go to the lowest bin. Returns `Some(0.0)` when every non-DC bin is
    /// numerically zero (a constant signal) and `None` when there is no non-DC bin.
    pub fn dominant_frequency(&self) -> Option<f64> {
        let mut peak: Option<(usize, f64)> = None;
        for (idx, &mag) in self.magnitudes.iter().enumerate().skip(1) {
            match peak {
                Some((_, best)) if mag <= best => {}
                _ => peak = Some((idx, mag)),
            }
        }

        let (idx, mag) = peak?;
        if mag <= FLAT_SPECTRUM_TOLERANCE * self.scale.max(f64::MIN_POSITIVE) {
            return Some(0.0);
        }
        Some(self.frequencies[idx])
    }
}

/// Reusable FFT front end.
///
/// Keeps the most recent plan; consecutive ticks over a full buffer usually
/// analyse the same length.
#[derive(Default)]
pub struct SpectrumAnalyzer {
    plan: Option<(usize, Arc<dyn Fft<f64>>)>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("planned_len", &self.plan.as_ref().map(|(len, _)| *len))
            .finish()
    }
}

impl SpectrumAnalyzer {
    /// Creates an analyzer with an empty plan cache.
    pub fn new() -> Self {
        Self { plan: None }
    }

    fn plan_for(&mut self, len: usize) -> Arc<dyn Fft<f64>> {
        match &self.plan {
            Some((planned, fft)) if *planned == len => fft.clone(),
            _ => {
                let fft = FftPlanner::<f64>::new().plan_fft_forward(len);
                self.plan = Some((len, fft.clone()));
                fft
            }
        }
    }

    /// One-sided magnitude spectrum of `values` sampled every `dt` seconds.
    ///
    /// The mean is removed before transforming. Bin `k` sits at `k / (n * dt)` Hz.
    pub fn spectrum(&mut self, values: &[f64], dt: f64) -> Spectrum {
        let n = values.len();
        if n == 0 {
            return Spectrum {
                frequencies: Vec::new(),
                magnitudes: Vec::new(),
                scale: 0.0,
            };
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let mut buffer: Vec<Complex<f64>> = values
            .iter()
            .map(|&v| Complex::new(v - mean, 0.0))
            .collect();

        self.plan_for(n).process(&mut buffer);

        let num_bins = n / 2 + 1;
        let freq_resolution = 1.0 / (n as f64 * dt);

        let mut magnitudes = Vec::with_capacity(num_bins);
        let mut frequencies = Vec::with_capacity(num_bins);
        for (i, c) in buffer.iter().take(num_bins).enumerate() {
            // DC and (for even n) Nyquist appear once in the one-sided spectrum.
            let one_sided = i == 0 || (n % 2 == 0 && i == n / 2);
            let factor = if one_sided { 1.0 } else { 2.0 };
            magnitudes.push(c.norm() * factor / n as f64);
            frequencies.push(i as f64 * freq_resolution);
        }

        let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

        Spectrum {
            frequencies,
            magnitudes,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn bin_layout_matches_length_and_spacing() {
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.spectrum(&sine(1.0, 10.0, 10), 0.1);
        assert_eq!(spectrum.len(), 6);
        assert!((spectrum.frequencies[1] - 1.0).abs() < 1e-12);
        assert!((spectrum.frequencies[5] - 5.0).abs() < 1e-12);

        let spectrum = analyzer.spectrum(&sine(1.0, 10.0, 11), 0.1);
        assert_eq!(spectrum.len(), 6);
    }

    #[test]
    fn finds_pure_tone() {
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.spectrum(&sine(50.0, 1024.0, 1024), 1.0 / 1024.0);
        let peak = spectrum.dominant_frequency().unwrap();
        assert!((peak - 50.0).abs() < 1.0, "peak at {peak}");
        // Amplitude scaling: a unit sine lands at ~1.0 in its bin.
        let idx = spectrum.frequencies.iter().position(|&f| f == peak).unwrap();
        assert!((spectrum.magnitudes[idx] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dc_offset_is_ignored() {
        let mut analyzer = SpectrumAnalyzer::new();
        let values: Vec<f64> = sine(3.0, 100.0, 500).iter().map(|v| v + 40.0).collect();
        let spectrum = analyzer.spectrum(&values, 0.01);
        assert!(spectrum.magnitudes[0] < 1e-9);
        assert!((spectrum.dominant_frequency().unwrap() - 3.0).abs() < 0.2);
    }

    #[test]
    fn constant_signal_reports_zero() {
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.spectrum(&[0.1; 64], 0.01);
        assert_eq!(spectrum.dominant_frequency(), Some(0.0));

        let spectrum = analyzer.spectrum(&[0.0; 64], 0.01);
        assert_eq!(spectrum.dominant_frequency(), Some(0.0));
    }

    #[test]
    fn ties_go_to_lowest_bin() {
        let spectrum = Spectrum {
            frequencies: vec![0.0, 1.0, 2.0, 3.0],
            magnitudes: vec![9.0, 4.0, 1.0, 4.0],
            scale: 1.0,
        };
        assert_eq!(spectrum.dominant_frequency(), Some(1.0));
    }

    #[test]
    fn too_short_for_non_dc_bin() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert!(analyzer.spectrum(&[], 1.0).dominant_frequency().is_none());
        assert!(analyzer.spectrum(&[1.0], 1.0).dominant_frequency().is_none());
    }
}
