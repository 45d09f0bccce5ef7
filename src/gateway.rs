//! Ingest gateway: payload decoding and the per-reading path.
//!
//! Decoding happens up front. A batch with any malformed element is rejected
//! whole, so the core only ever sees finite values.
//!
//! The per-reading path inserts into the buffer, publishes the `new_data` event
//! and appends the durable record. The three side effects are independent: a
//! failed append is reported in the outcome but the sample stays buffered and
//! has already been delivered live.

use crate::broadcast::Broadcaster;
use crate::core::{RecordAppender, Sample, SampleClock};
use crate::data::sample_buffer::SampleBuffer;
use crate::error::DaqError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One decoded inbound reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Parsed value
    pub value: f64,
    /// Sender-supplied timestamp in seconds, if any
    pub timestamp: Option<f64>,
}

impl Reading {
    /// A reading to be stamped on receipt.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }

    /// A reading with an explicit timestamp.
    pub fn at(timestamp: f64, value: f64) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchPayload {
    capacitances: Vec<Value>,
}

/// Parse a single textual value, e.g. a query parameter.
pub fn parse_value_str(raw: &str) -> Result<f64, DaqError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| DaqError::MalformedInput(format!("'{raw}' is not a number")))?;
    finite(value)
}

fn finite(value: f64) -> Result<f64, DaqError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DaqError::MalformedInput(format!("{value} is not finite")))
    }
}

/// Decode one batch element: a number, a numeric string, or `{value, timestamp?}`.
pub fn parse_reading(raw: &Value) -> Result<Reading, DaqError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DaqError::MalformedInput(format!("{n} is out of range")))
            .and_then(finite)
            .map(Reading::new),
        Value::String(s) => parse_value_str(s).map(Reading::new),
        Value::Object(map) => {
            let value = map
                .get("value")
                .ok_or_else(|| DaqError::MalformedInput("missing 'value'".into()))
                .and_then(parse_reading)?
                .value;
            let timestamp = match map.get("timestamp") {
                None | Some(Value::Null) => None,
                Some(ts) => Some(parse_reading(ts)?.value),
            };
            Ok(Reading { value, timestamp })
        }
        other => Err(DaqError::MalformedInput(format!(
            "unsupported reading {other}"
        ))),
    }
}

/// Decode a `{"capacitances": [...]}` body.
pub fn decode_batch(body: &[u8]) -> Result<Vec<Reading>, DaqError> {
    let payload: BatchPayload = serde_json::from_slice(body)
        .map_err(|e| DaqError::MalformedInput(format!("Invalid payload: {e}")))?;
    payload
        .capacitances
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            parse_reading(raw).map_err(|e| match e {
                DaqError::MalformedInput(msg) => {
                    DaqError::MalformedInput(format!("Invalid payload: element {i}: {msg}"))
                }
                other => other,
            })
        })
        .collect()
}

/// What happened to one reading.
#[derive(Debug)]
pub struct IngestOutcome {
    /// The sample as stored
    pub sample: Sample,
    /// Samples evicted from the buffer by this insert
    pub evicted: usize,
    /// Subscribers the sample was queued for
    pub delivered: usize,
    /// Set when the durable append failed
    pub persistence_error: Option<DaqError>,
}

/// Summary of a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Readings inserted and published
    pub accepted: usize,
    /// Readings whose durable append failed
    pub persistence_failures: usize,
}

/// Entry point for decoded readings.
#[derive(Clone)]
pub struct IngestGateway {
    buffer: Arc<SampleBuffer>,
    broadcaster: Arc<Broadcaster>,
    appender: Arc<dyn RecordAppender>,
    clock: SampleClock,
}

impl std::fmt::Debug for IngestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestGateway")
            .field("buffered", &self.buffer.len())
            .field("subscribers", &self.broadcaster.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl IngestGateway {
    /// Wire a gateway to its collaborators.
    pub fn new(
        buffer: Arc<SampleBuffer>,
        broadcaster: Arc<Broadcaster>,
        appender: Arc<dyn RecordAppender>,
        clock: SampleClock,
    ) -> Self {
        Self {
            buffer,
            broadcaster,
            appender,
            clock,
        }
    }

    /// Run the per-reading path once.
    pub fn ingest(&self, reading: Reading) -> IngestOutcome {
        let timestamp = reading.timestamp.unwrap_or_else(|| self.clock.now());
        let sample = Sample::new(timestamp, reading.value);

        let evicted = self.buffer.insert(sample);
        let delivered = self.broadcaster.publish_sample(&sample).delivered;

        let persistence_error = match self.appender.append(&sample) {
            Ok(()) => {
                debug!(value = sample.value, time = %sample.formatted_time(), "logged reading");
                None
            }
            Err(e) => {
                warn!(error = %e, value = sample.value, "failed to persist reading");
                Some(e)
            }
        };

        IngestOutcome {
            sample,
            evicted,
            delivered,
            persistence_error,
        }
    }

    /// Run the per-reading path for each element, in order.
    pub fn ingest_batch(&self, readings: &[Reading]) -> BatchReport {
        let mut report = BatchReport::default();
        for reading in readings {
            let outcome = self.ingest(*reading);
            report.accepted += 1;
            if outcome.persistence_error.is_some() {
                report.persistence_failures += 1;
            }
        }
        report
    }

    /// The shared buffer.
    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// The shared broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct MemoryAppender {
        records: Mutex<Vec<Sample>>,
    }

    impl RecordAppender for MemoryAppender {
        fn append(&self, sample: &Sample) -> Result<(), DaqError> {
            self.records.lock().push(*sample);
            Ok(())
        }
    }

    #[test]
    fn parses_numbers_strings_and_objects() {
        assert_eq!(parse_reading(&json!(3.5)).unwrap(), Reading::new(3.5));
        assert_eq!(parse_reading(&json!(" 42 ")).unwrap(), Reading::new(42.0));
        assert_eq!(
            parse_reading(&json!({"value": "1.5", "timestamp": 10.0})).unwrap(),
            Reading::at(10.0, 1.5)
        );
        assert_eq!(
            parse_reading(&json!({"value": 2, "timestamp": null})).unwrap(),
            Reading::new(2.0)
        );
    }

    #[test]
    fn rejects_non_numeric_values() {
        assert!(parse_reading(&json!("abc")).is_err());
        assert!(parse_reading(&json!(null)).is_err());
        assert!(parse_reading(&json!([1.0])).is_err());
        assert!(parse_reading(&json!({"timestamp": 1.0})).is_err());
        assert!(parse_value_str("NaN").is_err());
        assert!(parse_value_str("inf").is_err());
    }

    #[test]
    fn batch_rejected_whole_on_bad_element() {
        let err = decode_batch(br#"{"capacitances": [1, "x", 3]}"#).unwrap_err();
        assert!(err.to_string().contains("element 1"));
        assert!(decode_batch(br#"{"values": [1]}"#).is_err());
        assert!(decode_batch(b"not json").is_err());
        assert_eq!(decode_batch(br#"{"capacitances": []}"#).unwrap(), vec![]);
    }

    #[test]
    fn ingest_touches_buffer_broadcast_and_log() {
        let buffer = Arc::new(SampleBuffer::new(10, 100.0));
        let broadcaster = Arc::new(Broadcaster::new(8));
        let appender = Arc::new(MemoryAppender::default());
        let gateway = IngestGateway::new(
            buffer.clone(),
            broadcaster.clone(),
            appender.clone(),
            SampleClock::new(),
        );
        let mut sub = broadcaster.subscribe();

        let report = gateway.ingest_batch(&[Reading::at(1.0, 5.0), Reading::at(2.0, 6.0)]);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.persistence_failures, 0);

        assert_eq!(buffer.len(), 2);
        assert_eq!(appender.records.lock().len(), 2);
        assert!(sub.try_recv_sample().is_some());
        assert!(sub.try_recv_sample().is_some());
    }

    struct FullDisk;

    impl RecordAppender for FullDisk {
        fn append(&self, _sample: &Sample) -> Result<(), DaqError> {
            Err(DaqError::Persistence("no space left on device".into()))
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn failed_append_is_logged_and_reported() {
        let buffer = Arc::new(SampleBuffer::default());
        let gateway = IngestGateway::new(
            buffer.clone(),
            Arc::new(Broadcaster::default()),
            Arc::new(FullDisk),
            SampleClock::new(),
        );

        let outcome = gateway.ingest(Reading::at(5.0, 1.0));
        assert!(outcome.persistence_error.is_some());
        assert_eq!(buffer.len(), 1);
        assert!(logs_contain("failed to persist reading"));
    }

    #[test]
    fn receipt_time_assigned_when_missing() {
        let buffer = Arc::new(SampleBuffer::default());
        let gateway = IngestGateway::new(
            buffer.clone(),
            Arc::new(Broadcaster::default()),
            Arc::new(MemoryAppender::default()),
            SampleClock::new(),
        );
        let first = gateway.ingest(Reading::new(1.0)).sample;
        let second = gateway.ingest(Reading::new(2.0)).sample;
        assert!(first.timestamp > 1_000_000_000.0);
        assert!(second.timestamp >= first.timestamp);
    }
}
