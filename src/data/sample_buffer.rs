//! Bounded rolling store of recent samples.
//!
//! The buffer is the only piece of sample state shared between the ingest path and
//! the estimator. It is bounded two ways, both enforced on every insert:
//!
//! - **Age**: samples older than `window_seconds` relative to the newest insert are
//!   evicted from the head.
//! - **Count**: the head is then trimmed until at most `max_samples` remain. The
//!   count cap applies regardless of age.
//!
//! Timestamps are not re-sorted. An out-of-order insert is appended as-is and the
//! age sweep uses it as the reference point. Eviction only looks at the head, so
//! a stale sample sitting behind a newer head is kept: inserting 10, 0, 12 with
//! a 5 s window retains the sample at 0 even though it is 12 s older than the
//! newest. The age bound therefore holds only for non-decreasing timestamps; the
//! count cap holds always.
//!
//! # Concurrency
//! A single `parking_lot::Mutex` guards the deque. Both `insert` and `snapshot`
//! hold it only for the append/evict or the copy, so a snapshot always sees a
//! state between two inserts and never a half-evicted one.

use crate::config::BufferConfig;
use crate::core::Sample;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe, time-and-count-windowed sample store.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Mutex<VecDeque<Sample>>,
    max_samples: usize,
    window_seconds: f64,
}

impl SampleBuffer {
    /// Create an empty buffer with the given bounds.
    ///
    /// `max_samples` of zero is treated as one.
    pub fn new(max_samples: usize, window_seconds: f64) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples + 1)),
            max_samples,
            window_seconds,
        }
    }

    /// Create a buffer from the `[buffer]` configuration section.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.max_samples, config.window_seconds)
    }

    /// Append a sample and re-establish both bounds.
    ///
    /// Returns the number of samples evicted by this call.
    pub fn insert(&self, sample: Sample) -> usize {
        let mut samples = self.samples.lock();
        let before = samples.len() + 1;
        samples.push_back(sample);

        let cutoff = sample.timestamp - self.window_seconds;
        while samples.front().is_some_and(|head| head.timestamp < cutoff) {
            samples.pop_front();
        }
        while samples.len() > self.max_samples {
            samples.pop_front();
        }

        before - samples.len()
    }

    /// Point-in-time copy of the retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.lock().iter().copied().collect()
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// The most recently inserted sample.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.lock().back().copied()
    }

    /// Drop every retained sample.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Configured count cap.
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Configured retention window in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::from_config(&BufferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_sample_behind_newer_head_is_retained() {
        let buffer = SampleBuffer::new(100, 5.0);
        buffer.insert(Sample::new(10.0, 1.0));
        buffer.insert(Sample::new(0.0, 2.0));
        buffer.insert(Sample::new(12.0, 3.0));

        let timestamps: Vec<f64> = buffer.snapshot().iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![10.0, 0.0, 12.0]);
    }

    #[test]
    fn starts_empty() {
        let buffer = SampleBuffer::default();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert!(buffer.snapshot().is_empty());
        assert_eq!(buffer.max_samples(), 2000);
    }

    #[test]
    fn keeps_insertion_order() {
        let buffer = SampleBuffer::new(10, 100.0);
        for i in 0..5 {
            buffer.insert(Sample::new(i as f64, i as f64 * 2.0));
        }
        let values: Vec<f64> = buffer.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(buffer.latest(), Some(Sample::new(4.0, 8.0)));
    }

    #[test]
    fn evicts_by_age_relative_to_latest() {
        let buffer = SampleBuffer::new(100, 11.0);
        buffer.insert(Sample::new(0.0, 1.0));
        buffer.insert(Sample::new(5.0, 1.0));
        assert_eq!(buffer.insert(Sample::new(11.0, 1.0)), 0, "exactly on the edge stays");
        assert_eq!(buffer.insert(Sample::new(11.5, 1.0)), 1);

        let times: Vec<f64> = buffer.snapshot().iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![5.0, 11.0, 11.5]);
    }

    #[test]
    fn count_cap_applies_to_fresh_samples() {
        let buffer = SampleBuffer::new(3, 1_000.0);
        for i in 0..10 {
            buffer.insert(Sample::new(i as f64 * 0.001, i as f64));
        }
        let values: Vec<f64> = buffer.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn out_of_order_inserts_are_not_resorted() {
        let buffer = SampleBuffer::new(10, 100.0);
        buffer.insert(Sample::new(2.0, 1.0));
        buffer.insert(Sample::new(1.0, 2.0));
        buffer.insert(Sample::new(1.0, 3.0));
        let times: Vec<f64> = buffer.snapshot().iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let buffer = SampleBuffer::new(10, 100.0);
        buffer.insert(Sample::new(0.0, 1.0));
        let snap = buffer.snapshot();
        buffer.insert(Sample::new(1.0, 2.0));
        assert_eq!(snap.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn clear_empties_buffer() {
        let buffer = SampleBuffer::new(10, 100.0);
        buffer.insert(Sample::new(0.0, 1.0));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
