//! Motion-state assembly and publish gating.
//!
//! One [`MotionState`] exists per process run, bound to one physical device.
//! It accumulates the three independent field groups (orientation, angular
//! velocity, linear acceleration) as they arrive and republishes the full
//! record through the [`RecordSink`] once every group has been seen at least
//! once.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::publish::RecordSink;
use crate::types::{ImuRecord, Quaternion, Vec3};

/// Fixed 3×3 covariance matrices (row-major), set once at construction.
#[derive(Debug, Clone, Copy)]
pub struct Covariances {
    pub linear_acceleration: [f64; 9],
    pub angular_velocity: [f64; 9],
    pub orientation: [f64; 9],
}

impl Covariances {
    /// Build diagonal matrices from per-axis variances.
    pub fn diagonal(accel: f64, gyro: f64, orient: f64) -> Self {
        Self {
            linear_acceleration: diag(accel),
            angular_velocity: diag(gyro),
            orientation: diag(orient),
        }
    }
}

impl Default for Covariances {
    fn default() -> Self {
        use crate::config::defaults;
        Self::diagonal(
            defaults::DEFAULT_ACCEL_VARIANCE,
            defaults::DEFAULT_GYRO_VARIANCE,
            defaults::DEFAULT_ORIENT_VARIANCE,
        )
    }
}

/// Row-major 3×3 diagonal matrix with a uniform variance.
fn diag(variance: f64) -> [f64; 9] {
    let mut m = [0.0; 9];
    m[0] = variance;
    m[4] = variance;
    m[8] = variance;
    m
}

/// Which field groups have received at least one update.
///
/// Monotonic: once a flag is set it stays set for the life of the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub orientation: bool,
    pub acceleration: bool,
    pub gyro: bool,
}

impl Completeness {
    /// True once every field group has been seen — the publish gate.
    pub fn all(&self) -> bool {
        self.orientation && self.acceleration && self.gyro
    }
}

/// Mutable fields guarded by the single state lock.
#[derive(Debug)]
struct Fields {
    orientation: Quaternion,
    angular_velocity: Vec3,
    linear_acceleration: Vec3,
    seen: Completeness,
    last_publish: Option<DateTime<Utc>>,
    records_published: u64,
}

/// Latest known motion state for one device, shared across all live
/// connection dispatchers.
///
/// Owned by the bootstrap composer and borrowed (via `Arc`) by every
/// dispatcher for the connection's lifetime. One mutex guards the whole
/// "update field, recompute completeness, decide publish" sequence, so a
/// record can never be published with a field read mid-write.
///
/// Publish semantics: every updater call attempts a publish, and once the
/// gate is open each single-field update republishes the *entire* record —
/// including stale values for the other fields. This is "latest known state,
/// sampled at whichever field arrives", not a synchronized snapshot.
pub struct MotionState {
    frame_id: String,
    covariances: Covariances,
    sink: Arc<dyn RecordSink>,
    fields: Mutex<Fields>,
}

impl MotionState {
    pub fn new(frame_id: impl Into<String>, covariances: Covariances, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            frame_id: frame_id.into(),
            covariances,
            sink,
            fields: Mutex::new(Fields {
                orientation: Quaternion::IDENTITY,
                angular_velocity: Vec3::ZERO,
                linear_acceleration: Vec3::ZERO,
                seen: Completeness::default(),
                last_publish: None,
                records_published: 0,
            }),
        }
    }

    /// Store a new orientation from Euler angles in radians and attempt a
    /// publish.
    ///
    /// Angle semantics are the device's screen-relative frame — roll about X
    /// (screen-right), pitch about Y (screen-up), yaw about Z. See
    /// [`Quaternion::from_euler`] for the rotation order.
    pub fn update_orientation(&self, roll: f64, pitch: f64, yaw: f64) {
        let mut fields = self.lock();
        fields.orientation = Quaternion::from_euler(roll, pitch, yaw);
        fields.seen.orientation = true;
        self.try_publish(&mut fields);
    }

    /// Store a new angular velocity (rad/s) and attempt a publish.
    pub fn update_angular_velocity(&self, x: f64, y: f64, z: f64) {
        let mut fields = self.lock();
        fields.angular_velocity = Vec3::new(x, y, z);
        fields.seen.gyro = true;
        self.try_publish(&mut fields);
    }

    /// Store a new linear acceleration (m/s²) and attempt a publish.
    pub fn update_linear_acceleration(&self, x: f64, y: f64, z: f64) {
        let mut fields = self.lock();
        fields.linear_acceleration = Vec3::new(x, y, z);
        fields.seen.acceleration = true;
        self.try_publish(&mut fields);
    }

    /// Publish the full record if every field group has been seen.
    ///
    /// Runs under the state lock; the sink contract (non-blocking enqueue)
    /// keeps publish order identical to update order.
    fn try_publish(&self, fields: &mut Fields) {
        if !fields.seen.all() {
            return;
        }

        let now = Utc::now();
        fields.last_publish = Some(now);
        fields.records_published += 1;

        let record = ImuRecord {
            frame_id: self.frame_id.clone(),
            timestamp: now,
            orientation: fields.orientation,
            orientation_covariance: self.covariances.orientation,
            angular_velocity: fields.angular_velocity,
            angular_velocity_covariance: self.covariances.angular_velocity,
            linear_acceleration: fields.linear_acceleration,
            linear_acceleration_covariance: self.covariances.linear_acceleration,
        };
        self.sink.publish(&record);
    }

    /// Coordinate frame label stamped on published records.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Which field groups have been updated so far.
    pub fn completeness(&self) -> Completeness {
        self.lock().seen
    }

    /// Total records published since construction.
    pub fn records_published(&self) -> u64 {
        self.lock().records_published
    }

    /// Wall-clock time of the most recent publish, if any.
    pub fn last_publish(&self) -> Option<DateTime<Utc>> {
        self.lock().last_publish
    }

    fn lock(&self) -> MutexGuard<'_, Fields> {
        self.fields.lock().unwrap_or_else(|e| {
            tracing::warn!("MotionState lock poisoned — recovering");
            e.into_inner()
        })
    }
}
