//! Periodic dominant-rate estimation over the sample buffer.
//!
//! Each tick:
//! 1. snapshots the buffer,
//! 2. skips if fewer than `min_samples` are held,
//! 3. keeps samples within `analysis_window_seconds` of the newest one,
//! 4. treats them as uniform at the mean spacing `dt`,
//! 5. picks the strongest non-DC bin of the one-sided spectrum,
//! 6. publishes `f_peak * 60` as a `blink_rate` event.
//!
//! Skips are normal during start-up or sparse input and are logged at debug level.
//! Nothing here returns an error to the caller.
//!
//! # Architecture
//!
//! ```text
//! ingest ──insert──▶ SampleBuffer ◀──snapshot── EstimatorTask (every tick_period)
//!                                                   │
//!                                                   ▼
//!                                             Broadcaster::publish_rate
//! ```

use super::fft::SpectrumAnalyzer;
use super::sample_buffer::SampleBuffer;
use crate::broadcast::Broadcaster;
use crate::config::EstimatorConfig;
use crate::core::{RateEstimate, Sample, SampleClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a tick produced no estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// The snapshot held fewer than `min_samples`.
    TooFewSamples {
        /// Samples in the snapshot
        have: usize,
        /// Configured minimum
        need: usize,
    },
    /// Fewer than two samples fell inside the analysis window.
    TooFewInWindow {
        /// Samples inside the window
        have: usize,
    },
    /// Mean spacing was zero, negative or not finite.
    InvalidSpacing {
        /// The offending mean spacing
        dt: f64,
    },
    /// The spectrum had no bin above DC.
    NoSpectrum,
}

/// Result of one call to [`SpectralEstimator::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// An estimate was computed and published.
    Emitted(RateEstimate),
    /// Not enough usable data this time.
    Skipped(SkipReason),
    /// Another tick on this estimator was still running.
    Busy,
}

/// Dominant-frequency estimator.
///
/// Holds no sample state between ticks; only the FFT plan cache persists.
#[derive(Debug)]
pub struct SpectralEstimator {
    config: EstimatorConfig,
    analyzer: Mutex<SpectrumAnalyzer>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a tick ends, including on unwind.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SpectralEstimator {
    /// Create an estimator with the given tuning.
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            analyzer: Mutex::new(SpectrumAnalyzer::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Tuning in effect.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Analyse a snapshot. `now` becomes `computed_at`.
    pub fn estimate(&self, snapshot: &[Sample], now: f64) -> Result<RateEstimate, SkipReason> {
        if snapshot.len() < self.config.min_samples {
            return Err(SkipReason::TooFewSamples {
                have: snapshot.len(),
                need: self.config.min_samples,
            });
        }

        let window = analysis_window(snapshot, self.config.analysis_window_seconds);
        if window.len() < 2 {
            return Err(SkipReason::TooFewInWindow { have: window.len() });
        }

        let dt = mean_spacing(window);
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SkipReason::InvalidSpacing { dt });
        }

        let values: Vec<f64> = window.iter().map(|s| s.value).collect();
        let spectrum = self.analyzer.lock().spectrum(&values, dt);
        let f_peak = spectrum.dominant_frequency().ok_or(SkipReason::NoSpectrum)?;

        Ok(RateEstimate {
            rate_per_minute: (f_peak * 60.0).max(0.0),
            computed_at: now,
        })
    }

    /// Run one tick: snapshot, analyse, publish.
    ///
    /// Returns [`TickOutcome::Busy`] without doing anything if a tick on this
    /// estimator is already running.
    pub fn tick(
        &self,
        buffer: &SampleBuffer,
        broadcaster: &Broadcaster,
        clock: &SampleClock,
    ) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("estimator tick skipped, previous tick still running");
            return TickOutcome::Busy;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let snapshot = buffer.snapshot();
        match self.estimate(&snapshot, clock.now()) {
            Ok(estimate) => {
                let report = broadcaster.publish_rate(&estimate);
                debug!(
                    rate = estimate.rate_per_minute,
                    samples = snapshot.len(),
                    delivered = report.delivered,
                    "rate estimate published"
                );
                TickOutcome::Emitted(estimate)
            }
            Err(reason) => {
                debug!(?reason, "estimator tick skipped");
                TickOutcome::Skipped(reason)
            }
        }
    }
}

/// Suffix of `snapshot` whose timestamps lie within `seconds` of the last sample.
fn analysis_window(snapshot: &[Sample], seconds: f64) -> &[Sample] {
    let Some(latest) = snapshot.last() else {
        return snapshot;
    };
    let cutoff = latest.timestamp - seconds;
    let start = snapshot
        .iter()
        .position(|s| s.timestamp >= cutoff)
        .unwrap_or(snapshot.len());
    &snapshot[start..]
}

fn mean_spacing(window: &[Sample]) -> f64 {
    let diffs: f64 = window
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .sum();
    diffs / (window.len() - 1) as f64
}

/// Background task driving [`SpectralEstimator::tick`] on a fixed period.
///
/// Ticks run to completion on the blocking pool before the next one is awaited,
/// and missed timer ticks are skipped, so at most one analysis runs at a time.
pub struct EstimatorTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EstimatorTask {
    /// Start ticking. Must be called inside a Tokio runtime.
    pub fn spawn(
        estimator: Arc<SpectralEstimator>,
        buffer: Arc<SampleBuffer>,
        broadcaster: Arc<Broadcaster>,
        clock: SampleClock,
    ) -> Self {
        let period = estimator.config().tick_period();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_ms = period.as_millis() as u64, "estimator started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let estimator = estimator.clone();
                        let buffer = buffer.clone();
                        let broadcaster = broadcaster.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            estimator.tick(&buffer, &broadcaster, &clock)
                        })
                        .await;
                        if let Err(e) = result {
                            warn!(error = %e, "estimator tick aborted");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            info!("estimator stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to stop and wait for it. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "estimator task ended abnormally");
            }
        }
    }
}

impl Drop for EstimatorTask {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
