//! Synthetic sensor signals for the `simulate` command and for tests.
//!
//! [`SpikeWave`] reproduces the blink-like shape seen on the capacitance
//! sensor: a fast rise, a long linear decay and a flat rest until the next
//! cycle. [`SineWave`] is a plain tone for checking estimator accuracy.

use crate::core::Sample;
use rand::Rng;
use std::f64::consts::PI;

/// A periodic signal evaluated at an arbitrary time.
pub trait Waveform: Send + Sync {
    /// Signal value at `t` seconds.
    fn value_at(&self, t: f64) -> f64;

    /// Fundamental frequency in Hz.
    fn frequency(&self) -> f64;

    /// `duration` seconds of samples at `rate` Hz, starting at `start`.
    fn sample(&self, start: f64, rate: f64, duration: f64) -> Vec<Sample> {
        if !(rate > 0.0 && duration > 0.0) {
            return Vec::new();
        }
        let n = (rate * duration).round() as usize;
        (0..n)
            .map(|i| {
                let t = start + i as f64 / rate;
                Sample::new(t, self.value_at(t))
            })
            .collect()
    }
}

/// Spike, linear ramp down, then a flat plateau.
///
/// Peak amplitude is 1.0 and the plateau sits at 0.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeWave {
    /// Seconds per cycle
    pub period: f64,
    /// Rise time of the spike
    pub spike_width: f64,
    /// Rest time at zero at the end of each cycle
    pub plateau_width: f64,
}

impl Default for SpikeWave {
    fn default() -> Self {
        Self {
            period: 1.0,
            spike_width: 0.05,
            plateau_width: 0.2,
        }
    }
}

impl SpikeWave {
    /// Default shape at `blinks_per_minute`, with segment widths scaled to the period.
    pub fn at_rate(blinks_per_minute: f64) -> Self {
        let base = Self::default();
        let period = 60.0 / blinks_per_minute;
        Self {
            period,
            spike_width: base.spike_width * period,
            plateau_width: base.plateau_width * period,
        }
    }

    fn ramp_width(&self) -> f64 {
        (self.period - self.spike_width - self.plateau_width).max(0.0)
    }
}

impl Waveform for SpikeWave {
    fn value_at(&self, t: f64) -> f64 {
        if !(self.period > 0.0) {
            return 0.0;
        }
        let phase = t.rem_euclid(self.period);
        let ramp = self.ramp_width();
        if phase < self.spike_width {
            phase / self.spike_width
        } else if phase < self.spike_width + ramp {
            1.0 - (phase - self.spike_width) / ramp
        } else {
            0.0
        }
    }

    fn frequency(&self) -> f64 {
        1.0 / self.period
    }
}

/// `offset + amplitude * sin(2π f t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWave {
    /// Frequency in Hz
    pub frequency: f64,
    /// Peak deviation from `offset`
    pub amplitude: f64,
    /// Constant baseline
    pub offset: f64,
}

impl SineWave {
    /// Unit-amplitude tone around zero.
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            amplitude: 1.0,
            offset: 0.0,
        }
    }

    /// Same tone shifted by a constant baseline.
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }
}

impl Waveform for SineWave {
    fn value_at(&self, t: f64) -> f64 {
        self.offset + self.amplitude * (2.0 * PI * self.frequency * t).sin()
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }
}

/// Adds uniform noise in `[-amplitude, amplitude]` to each value.
pub fn add_noise(samples: &mut [Sample], amplitude: f64) {
    if amplitude <= 0.0 {
        return;
    }
    let mut rng = rand::thread_rng();
    for sample in samples {
        sample.value += rng.gen_range(-amplitude..=amplitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_shape() {
        let wave = SpikeWave::default();
        assert_eq!(wave.value_at(0.0), 0.0);
        assert!((wave.value_at(0.025) - 0.5).abs() < 1e-9);
        assert!((wave.value_at(0.05) - 1.0).abs() < 1e-9);
        // Ramp runs 0.05..0.8, so halfway down at 0.425.
        assert!((wave.value_at(0.425) - 0.5).abs() < 1e-9);
        assert_eq!(wave.value_at(0.9), 0.0);
        assert!((wave.value_at(1.025) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rate_scaled_spike() {
        let wave = SpikeWave::at_rate(30.0);
        assert!((wave.period - 2.0).abs() < 1e-12);
        assert!((wave.frequency() - 0.5).abs() < 1e-12);
        assert!((wave.spike_width - 0.1).abs() < 1e-12);
    }

    #[test]
    fn sampling_grid() {
        let samples = SineWave::new(1.0).sample(10.0, 4.0, 2.0);
        assert_eq!(samples.len(), 8);
        assert_eq!(samples[0].timestamp, 10.0);
        assert!((samples[1].timestamp - 10.25).abs() < 1e-12);
        assert!(SineWave::new(1.0).sample(0.0, 0.0, 1.0).is_empty());
    }

    #[test]
    fn noise_stays_in_bounds() {
        let mut samples = SineWave::new(1.0).with_offset(5.0).sample(0.0, 100.0, 1.0);
        let clean: Vec<f64> = samples.iter().map(|s| s.value).collect();
        add_noise(&mut samples, 0.1);
        for (s, c) in samples.iter().zip(clean) {
            assert!((s.value - c).abs() <= 0.1 + 1e-12);
        }
    }
}
