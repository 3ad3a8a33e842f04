//! Per-connection message dispatch: frame → sensor entries → MotionState.
//!
//! One [`StreamDispatcher`] exists per accepted connection. It parses each
//! inbound frame, routes the recognized sensor entries to the shared
//! [`MotionState`], and reports per-frame errors without ever tearing the
//! connection down over a malformed payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::{FrameEvent, FrameSource};
use crate::imu::MotionState;
use crate::types::{SensorEntry, SensorFrame, SensorKind};

/// Dispatch errors — all caught at the frame boundary, never fatal.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{kind} entry missing {field}")]
    MissingValue {
        kind: SensorKind,
        field: &'static str,
    },
}

// ============================================================================
// Shared Counters
// ============================================================================

/// Live ingest counters shared by every dispatcher and the status endpoint.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub connections_opened: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub entries_routed: AtomicU64,
    pub entries_ignored: AtomicU64,
    pub entries_failed: AtomicU64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            entries_routed: self.entries_routed.load(Ordering::Relaxed),
            entries_ignored: self.entries_ignored.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestCounters`] for the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub connections_opened: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub entries_routed: u64,
    pub entries_ignored: u64,
    pub entries_failed: u64,
}

// ============================================================================
// Stream Dispatcher
// ============================================================================

/// One connection's message loop over a shared [`MotionState`].
///
/// Single-use: a dispatcher dies with its connection and is never reused.
/// Any number of dispatchers may borrow the same state handle concurrently.
pub struct StreamDispatcher {
    state: Arc<MotionState>,
    counters: Arc<IngestCounters>,
    connection_id: u64,
    /// Per-connection totals for the close log.
    frames_seen: u64,
    frames_dropped: u64,
}

impl StreamDispatcher {
    pub fn new(state: Arc<MotionState>, counters: Arc<IngestCounters>, connection_id: u64) -> Self {
        Self {
            state,
            counters,
            connection_id,
            frames_seen: 0,
            frames_dropped: 0,
        }
    }

    /// Run the message loop until the source closes, a transport error
    /// occurs, or shutdown is signalled.
    pub async fn run<S: FrameSource>(mut self, source: &mut S, cancel: CancellationToken) {
        info!(
            connection = self.connection_id,
            source = source.source_name(),
            "Sensor stream connected"
        );

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(connection = self.connection_id, "Shutdown signal received — closing stream");
                    break;
                }
                result = source.next_frame() => match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(connection = self.connection_id, error = %e, "Transport error — closing stream");
                        break;
                    }
                }
            };

            let text = match event {
                FrameEvent::Frame(t) => t,
                FrameEvent::Closed => {
                    info!(connection = self.connection_id, "Peer closed the stream");
                    break;
                }
            };

            self.handle_frame(&text);
        }

        info!(
            connection = self.connection_id,
            frames = self.frames_seen,
            dropped = self.frames_dropped,
            "Sensor stream closed"
        );
    }

    /// Process one frame.
    ///
    /// Unparseable envelopes and frames without readings are dropped
    /// silently (debug diagnostic only). A failing entry is logged as an
    /// error and abandons the rest of its frame; updates already applied
    /// stand, and the loop continues with the next frame.
    pub fn handle_frame(&mut self, text: &str) {
        self.frames_seen += 1;
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let frame: SensorFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                self.drop_frame();
                debug!(connection = self.connection_id, error = %e, "Dropping unparseable frame");
                return;
            }
        };

        if frame.sensors.is_empty() {
            self.drop_frame();
            debug!(
                connection = self.connection_id,
                "Dropping frame without sensor readings"
            );
            return;
        }

        for entry in &frame.sensors {
            match self.route_entry(entry) {
                Ok(true) => {
                    self.counters.entries_routed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.counters.entries_ignored.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.entries_failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        connection = self.connection_id,
                        sensor = %entry.name,
                        error = %e,
                        "Failed to process sensor entry — abandoning frame"
                    );
                    break;
                }
            }
        }
    }

    /// Route one entry to the matching updater. `Ok(false)` means the name
    /// is outside the handler set and was ignored.
    fn route_entry(&self, entry: &SensorEntry) -> Result<bool, DispatchError> {
        let kind = SensorKind::from_name(&entry.name);
        match kind {
            SensorKind::Accelerometer => {
                let (x, y, z) = xyz(entry, kind)?;
                self.state.update_linear_acceleration(x, y, z);
            }
            SensorKind::Gyroscope => {
                let (x, y, z) = xyz(entry, kind)?;
                self.state.update_angular_velocity(x, y, z);
            }
            SensorKind::Orientation => {
                // Screen-relative remap: the phone reports value0=yaw(Z),
                // value1=roll(X), value2=pitch(Y), in degrees.
                let yaw = require(entry.value0, kind, "value0")?;
                let roll = require(entry.value1, kind, "value1")?;
                let pitch = require(entry.value2, kind, "value2")?;
                self.state.update_orientation(
                    roll.to_radians(),
                    pitch.to_radians(),
                    yaw.to_radians(),
                );
            }
            SensorKind::Unknown => return Ok(false),
        }
        Ok(true)
    }

    fn drop_frame(&mut self) {
        self.frames_dropped += 1;
        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

fn require(
    value: Option<f64>,
    kind: SensorKind,
    field: &'static str,
) -> Result<f64, DispatchError> {
    value.ok_or(DispatchError::MissingValue { kind, field })
}

fn xyz(entry: &SensorEntry, kind: SensorKind) -> Result<(f64, f64, f64), DispatchError> {
    Ok((
        require(entry.value0, kind, "value0")?,
        require(entry.value1, kind, "value1")?,
        require(entry.value2, kind, "value2")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::Covariances;
    use crate::publish::RecordSink;
    use crate::types::{ImuRecord, Quaternion};
    use std::sync::Mutex;

    struct CollectingSink {
        records: Mutex<Vec<ImuRecord>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        fn last(&self) -> ImuRecord {
            self.records.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl RecordSink for CollectingSink {
        fn publish(&self, record: &ImuRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn dispatcher() -> (StreamDispatcher, Arc<CollectingSink>, Arc<MotionState>) {
        let sink = CollectingSink::new();
        let state = Arc::new(MotionState::new(
            "imu",
            Covariances::default(),
            sink.clone(),
        ));
        let counters = Arc::new(IngestCounters::default());
        (
            StreamDispatcher::new(state.clone(), counters, 1),
            sink,
            state,
        )
    }

    const FULL_FRAME: &str = r#"{"timestamp":1624386177562,"sensors":[
        {"name":"Accelerometer","value0":0.093,"value1":-0.325,"value2":9.860},
        {"name":"Gyroscope","value0":0.00036,"value1":0.00027,"value2":-0.0011},
        {"name":"Orientation","value0":209.6,"value1":1.91,"value2":0.57},
        {"name":"Location","value0":null,"value1":null,"value2":null}]}"#;

    #[test]
    fn test_full_frame_routes_and_publishes_per_entry() {
        let (mut dispatcher, sink, _state) = dispatcher();
        dispatcher.handle_frame(FULL_FRAME);

        // Accel and gyro arrive before orientation; the gate opens on the
        // third entry, so exactly one record leaves for this frame.
        assert_eq!(sink.count(), 1);
        assert_eq!(dispatcher.counters.entries_routed.load(Ordering::Relaxed), 3);
        assert_eq!(
            dispatcher.counters.entries_ignored.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_malformed_frame_is_dropped_silently() {
        let (mut dispatcher, sink, state) = dispatcher();

        dispatcher.handle_frame("not json at all");
        dispatcher.handle_frame(r#"{"timestamp":"wrong type"}"#);
        dispatcher.handle_frame(r#"{"timestamp":5}"#);
        dispatcher.handle_frame(r#"{"timestamp":5,"sensors":[]}"#);

        assert_eq!(sink.count(), 0);
        assert_eq!(state.completeness(), Default::default());
        assert_eq!(dispatcher.frames_dropped, 4);
        assert_eq!(
            dispatcher.counters.frames_dropped.load(Ordering::Relaxed),
            4
        );
    }

    #[test]
    fn test_unknown_sensor_ignored_others_still_processed() {
        let (mut dispatcher, _sink, state) = dispatcher();

        dispatcher.handle_frame(
            r#"{"timestamp":1,"sensors":[
                {"name":"Magnetometer","value0":1.0,"value1":2.0,"value2":3.0},
                {"name":"Gyroscope","value0":0.1,"value1":0.2,"value2":0.3}]}"#,
        );

        let seen = state.completeness();
        assert!(seen.gyro);
        assert!(!seen.acceleration);
        assert_eq!(
            dispatcher.counters.entries_ignored.load(Ordering::Relaxed),
            1
        );
        assert_eq!(dispatcher.counters.entries_routed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failing_entry_abandons_rest_of_frame_only() {
        let (mut dispatcher, _sink, state) = dispatcher();

        // The null accelerometer value aborts this frame; the gyro entry
        // behind it never runs, but the connection loop keeps going.
        dispatcher.handle_frame(
            r#"{"timestamp":1,"sensors":[
                {"name":"Accelerometer","value0":null,"value1":2.0,"value2":3.0},
                {"name":"Gyroscope","value0":0.1,"value1":0.2,"value2":0.3}]}"#,
        );

        let seen = state.completeness();
        assert!(!seen.acceleration);
        assert!(!seen.gyro);
        assert_eq!(
            dispatcher.counters.entries_failed.load(Ordering::Relaxed),
            1
        );
        assert_eq!(dispatcher.counters.entries_routed.load(Ordering::Relaxed), 0);

        // The next frame processes normally.
        dispatcher.handle_frame(
            r#"{"timestamp":2,"sensors":[
                {"name":"Gyroscope","value0":0.1,"value1":0.2,"value2":0.3}]}"#,
        );
        assert!(state.completeness().gyro);
        assert_eq!(dispatcher.counters.entries_routed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_entries_before_a_failure_stand() {
        let (mut dispatcher, _sink, state) = dispatcher();

        dispatcher.handle_frame(
            r#"{"timestamp":1,"sensors":[
                {"name":"Gyroscope","value0":0.1,"value1":0.2,"value2":0.3},
                {"name":"Accelerometer","value0":null,"value1":2.0,"value2":3.0}]}"#,
        );

        let seen = state.completeness();
        assert!(seen.gyro);
        assert!(!seen.acceleration);
    }

    #[test]
    fn test_orientation_remap_and_degrees() {
        let (mut dispatcher, sink, _state) = dispatcher();

        // Gate-openers first
        dispatcher.handle_frame(
            r#"{"timestamp":1,"sensors":[
                {"name":"Accelerometer","value0":0.0,"value1":0.0,"value2":9.8},
                {"name":"Gyroscope","value0":0.0,"value1":0.0,"value2":0.0}]}"#,
        );

        // value0=yaw, value1=roll, value2=pitch, all in degrees
        dispatcher.handle_frame(
            r#"{"timestamp":2,"sensors":[
                {"name":"Orientation","value0":30.0,"value1":10.0,"value2":5.0}]}"#,
        );

        let expected = Quaternion::from_euler(
            10.0_f64.to_radians(),
            5.0_f64.to_radians(),
            30.0_f64.to_radians(),
        );
        let record = sink.last();
        assert!((record.orientation.x - expected.x).abs() < 1e-12);
        assert!((record.orientation.y - expected.y).abs() < 1e-12);
        assert!((record.orientation.z - expected.z).abs() < 1e-12);
        assert!((record.orientation.w - expected.w).abs() < 1e-12);
    }

    #[test]
    fn test_entries_processed_in_frame_order() {
        let (mut dispatcher, sink, _state) = dispatcher();

        dispatcher.handle_frame(
            r#"{"timestamp":1,"sensors":[
                {"name":"Orientation","value0":0.0,"value1":0.0,"value2":0.0},
                {"name":"Gyroscope","value0":0.0,"value1":0.0,"value2":0.0},
                {"name":"Accelerometer","value0":1.0,"value1":2.0,"value2":3.0},
                {"name":"Accelerometer","value0":4.0,"value1":5.0,"value2":6.0}]}"#,
        );

        // Gate opens at the first Accelerometer entry; the second triggers
        // another publish carrying the newer values.
        assert_eq!(sink.count(), 2);
        assert_eq!(sink.last().linear_acceleration.x, 4.0);
    }
}
