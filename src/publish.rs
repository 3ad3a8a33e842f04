//! Publish seam between the ingest side and the pub/sub runtime.
//!
//! The core never talks to the pub/sub transport directly — it hands each
//! assembled record to a [`RecordSink`]. The provided implementation wraps a
//! tokio broadcast channel, which acts as the process-wide topic.

use tokio::sync::broadcast;

use crate::types::ImuRecord;

/// Narrow interface through which assembled motion-state records leave the
/// core.
///
/// Contract: `publish` MUST be a non-blocking enqueue. It is invoked from
/// inside the motion-state critical section, on whatever execution context
/// ran the triggering field update. Implementations that need a specific
/// calling context must hand the record off internally (e.g. via a channel)
/// rather than block here.
pub trait RecordSink: Send + Sync {
    fn publish(&self, record: &ImuRecord);
}

/// Broadcast-channel sink: the process-wide pub/sub topic for IMU records.
///
/// Subscribers obtain a receiver via [`subscribe`](BroadcastSink::subscribe)
/// before records start flowing. Slow subscribers lag and drop old records
/// rather than backpressure the ingest path.
pub struct BroadcastSink {
    tx: broadcast::Sender<ImuRecord>,
}

impl BroadcastSink {
    /// Create the sink and a first subscriber.
    ///
    /// The returned receiver keeps the channel open; without at least one
    /// live receiver, published records are dropped.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ImuRecord>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    /// Attach another subscriber to the record topic.
    pub fn subscribe(&self) -> broadcast::Receiver<ImuRecord> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RecordSink for BroadcastSink {
    fn publish(&self, record: &ImuRecord) {
        // send() fails only when no receiver is subscribed; the record is
        // simply dropped, like a topic nobody listens to.
        if self.tx.send(record.clone()).is_err() {
            tracing::debug!(frame_id = %record.frame_id, "No subscribers — record dropped");
        }
    }
}
