//! Core data types and traits for the sample pipeline.
use crate::error::DaqError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Textual timestamp layout used for durable records and live events.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A single capacitance reading.
///
/// `timestamp` is in seconds. Samples stamped by [`SampleClock`] are seconds since
/// the Unix epoch and never go backwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds, floating precision.
    pub timestamp: f64,
    /// Raw reading.
    pub value: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// The timestamp rendered as UTC wall time, millisecond precision.
    pub fn formatted_time(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Dominant oscillation rate derived from one estimator tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    /// Cycles per minute, never negative.
    pub rate_per_minute: f64,
    /// Clock reading when the estimate was produced.
    pub computed_at: f64,
}

impl RateEstimate {
    /// Rate rounded to one decimal place for delivery.
    pub fn rounded_rate(&self) -> f64 {
        (self.rate_per_minute * 10.0).round() / 10.0
    }
}

/// Render seconds-since-epoch as [`TIMESTAMP_FORMAT`].
///
/// Values outside chrono's range fall back to the raw number.
pub fn format_timestamp(seconds: f64) -> String {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() {
        return seconds.to_string();
    }
    match DateTime::<Utc>::from_timestamp_millis(millis as i64) {
        Some(dt) => dt.format(TIMESTAMP_FORMAT).to_string(),
        None => seconds.to_string(),
    }
}

/// Monotonic clock that reports wall-clock-anchored seconds.
///
/// The wall time is read once; after that only `Instant` is consulted, so
/// readings taken from one clock are non-decreasing.
#[derive(Clone, Copy, Debug)]
pub struct SampleClock {
    anchor_wall: f64,
    anchor_instant: Instant,
}

impl SampleClock {
    /// Anchors a new clock at the current wall time.
    pub fn new() -> Self {
        let anchor_wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            anchor_wall,
            anchor_instant: Instant::now(),
        }
    }

    /// Seconds since the Unix epoch.
    pub fn now(&self) -> f64 {
        self.anchor_wall + self.anchor_instant.elapsed().as_secs_f64()
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only sink for accepted samples.
///
/// Implementations write one record per call and return only once the record is
/// durable or the failure is known. They must tolerate concurrent callers.
pub trait RecordAppender: Send + Sync {
    /// Appends one record.
    fn append(&self, sample: &Sample) -> Result<(), DaqError>;

    /// Flushes anything still buffered. Called on shutdown.
    fn flush(&self) -> Result<(), DaqError> {
        Ok(())
    }
}
