//! Live fan-out of sample and rate events.
//!
//! Each subscriber owns two bounded `mpsc` queues, one per event kind, so a burst
//! of samples can never crowd out rate updates. Publishing uses `try_send`:
//! a full queue drops the event for that subscriber only, a closed queue
//! unregisters the subscriber. Producers never wait on consumers.
//!
//! Publishes are serialized under the registry lock, so every subscriber sees
//! samples (and, separately, rates) in one global order. The lock is held only
//! for the `try_send` sweep.

use crate::core::{RateEstimate, Sample};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Opaque handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// A fully formed event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// One accepted reading.
    NewData {
        /// Reading time, millisecond precision text.
        time: String,
        /// Reading value.
        value: f64,
    },
    /// Latest dominant rate, cycles per minute rounded to one decimal.
    BlinkRate {
        /// Rate in cycles per minute.
        rate: f64,
    },
}

impl Event {
    /// Event for an accepted sample.
    pub fn from_sample(sample: &Sample) -> Self {
        Event::NewData {
            time: sample.formatted_time(),
            value: sample.value,
        }
    }

    /// Event for an estimator result.
    pub fn from_estimate(estimate: &RateEstimate) -> Self {
        Event::BlinkRate {
            rate: estimate.rounded_rate(),
        }
    }

    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewData { .. } => "new_data",
            Event::BlinkRate { .. } => "blink_rate",
        }
    }

    /// JSON text as pushed over the live channel.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Registry-side half of a subscriber.
#[derive(Debug)]
struct SubscriberQueues {
    samples: mpsc::Sender<Arc<Event>>,
    rates: mpsc::Sender<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

/// Consumer-side half returned by [`Broadcaster::subscribe`].
///
/// Dropping it closes both queues; the broadcaster notices on the next publish.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    samples: mpsc::Receiver<Arc<Event>>,
    rates: mpsc::Receiver<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// This subscriber's handle.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event of either kind.
    ///
    /// Rate events are checked first when both are ready. Returns `None` once the
    /// broadcaster has closed or dropped this subscriber and both queues are drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        tokio::select! {
            biased;
            Some(ev) = self.rates.recv() => Some(ev),
            Some(ev) = self.samples.recv() => Some(ev),
            else => None,
        }
    }

    /// Next `new_data` event.
    pub async fn recv_sample(&mut self) -> Option<Arc<Event>> {
        self.samples.recv().await
    }

    /// Next `blink_rate` event.
    pub async fn recv_rate(&mut self) -> Option<Arc<Event>> {
        self.rates.recv().await
    }

    /// Non-blocking poll of the sample queue.
    pub fn try_recv_sample(&mut self) -> Option<Arc<Event>> {
        self.samples.try_recv().ok()
    }

    /// Non-blocking poll of the rate queue.
    pub fn try_recv_rate(&mut self) -> Option<Arc<Event>> {
        self.rates.try_recv().ok()
    }

    /// Events dropped for this subscriber because its queues were full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of one publish call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the event was queued for.
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers found closed and removed.
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Sample,
    Rate,
}

/// Registry of live subscribers with best-effort delivery.
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberQueues>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broadcaster {
    /// Create a broadcaster whose subscriber queues hold `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sample_tx, sample_rx) = mpsc::channel(self.capacity);
        let (rate_tx, rate_rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        self.subscribers.lock().insert(
            id,
            SubscriberQueues {
                samples: sample_tx,
                rates: rate_tx,
                dropped: dropped.clone(),
            },
        );
        debug!(%id, "subscriber registered");

        Subscription {
            id,
            samples: sample_rx,
            rates: rate_rx,
            dropped,
        }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(%id, "subscriber unregistered");
        }
        removed
    }

    /// Deliver a `new_data` event to every subscriber.
    pub fn publish_sample(&self, sample: &Sample) -> PublishReport {
        self.publish(Kind::Sample, Arc::new(Event::from_sample(sample)))
    }

    /// Deliver a `blink_rate` event to every subscriber.
    pub fn publish_rate(&self, estimate: &RateEstimate) -> PublishReport {
        self.publish(Kind::Rate, Arc::new(Event::from_estimate(estimate)))
    }

    fn publish(&self, kind: Kind, event: Arc<Event>) -> PublishReport {
        let mut report = PublishReport::default();
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return report;
        }

        let mut closed = Vec::new();
        for (id, queues) in subscribers.iter() {
            let sender = match kind {
                Kind::Sample => &queues.samples,
                Kind::Rate => &queues.rates,
            };
            match sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    queues.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            report.removed += 1;
            debug!(%id, "pruned closed subscriber");
        }

        report
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drop every subscriber queue.
    ///
    /// Pending events stay readable; each `Subscription::recv` returns `None` once
    /// drained, which ends delivery loops.
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock();
        let count = subscribers.len();
        subscribers.clear();
        info!(subscribers = count, "broadcaster closed");
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
