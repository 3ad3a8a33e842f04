//! Core data types: inbound sensor frames and the published IMU record.
//!
//! The inbound side mirrors the phone app's wire format — one JSON envelope
//! per WebSocket text message, carrying zero or more named sensor readings.
//! The outbound side is the assembled motion-state record republished on the
//! process-wide channel.

use chrono::{DateTime, Utc};
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

// ============================================================================
// Inbound Wire Format
// ============================================================================

/// One inbound frame: a timestamp plus a batch of sensor readings.
///
/// Sample message from the phone app:
///
/// ```json
/// {"timestamp":1624386177562,"sensors":[
///   {"name":"Accelerometer","value0":0.093,"value1":-0.325,"value2":9.860},
///   {"name":"Gyroscope","value0":3.66e-4,"value1":2.74e-4,"value2":-0.0011},
///   {"name":"Orientation","value0":209.604,"value1":1.914,"value2":0.575},
///   {"name":"Location","value0":null,"value1":null,"value2":null}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SensorFrame {
    /// Epoch milliseconds stamped by the phone. Informational only —
    /// published records carry server-side wall-clock time.
    #[serde(default)]
    pub timestamp: i64,

    /// Sensor readings in arrival order. A frame with no readings is dropped.
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

/// One `{name, value0, value1, value2}` reading inside a frame.
///
/// Values are nullable on the wire — the phone sends `null` for sensors it
/// cannot sample (e.g. `Location` without a GPS fix).
#[derive(Debug, Clone, Deserialize)]
pub struct SensorEntry {
    pub name: String,
    #[serde(default)]
    pub value0: Option<f64>,
    #[serde(default)]
    pub value1: Option<f64>,
    #[serde(default)]
    pub value2: Option<f64>,
}

/// The closed set of sensor types the dispatcher routes.
///
/// Anything else on the wire maps to `Unknown` and is ignored without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Orientation,
    Unknown,
}

impl SensorKind {
    /// Map a wire-format sensor name onto the closed handler set.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Accelerometer" => SensorKind::Accelerometer,
            "Gyroscope" => SensorKind::Gyroscope,
            "Orientation" => SensorKind::Orientation,
            _ => SensorKind::Unknown,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Accelerometer => write!(f, "Accelerometer"),
            SensorKind::Gyroscope => write!(f, "Gyroscope"),
            SensorKind::Orientation => write!(f, "Orientation"),
            SensorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

// ============================================================================
// Published Record
// ============================================================================

/// Orientation quaternion in (x, y, z, w) component order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Build a quaternion from Euler angles in radians.
    ///
    /// Angles follow the device's screen-relative frame: roll about X
    /// (screen-right), pitch about Y (screen-up), yaw about Z (out of the
    /// screen). Rotations are applied roll, then pitch, then yaw
    /// (R = Rz·Ry·Rx), matching the upstream angle semantics.
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        let q = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        Self {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        }
    }
}

/// 3-component vector (angular velocity in rad/s, acceleration in m/s²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// The assembled motion-state record republished on every gated update.
///
/// Covariance matrices are row-major 3×3, fixed at construction of the
/// owning [`MotionState`](crate::imu::MotionState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuRecord {
    /// Coordinate frame label for downstream consumers.
    pub frame_id: String,
    /// Wall-clock time of this publish.
    pub timestamp: DateTime<Utc>,
    pub orientation: Quaternion,
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vec3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vec3,
    pub linear_acceleration_covariance: [f64; 9],
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_sensor_kind_mapping() {
        assert_eq!(
            SensorKind::from_name("Accelerometer"),
            SensorKind::Accelerometer
        );
        assert_eq!(SensorKind::from_name("Gyroscope"), SensorKind::Gyroscope);
        assert_eq!(
            SensorKind::from_name("Orientation"),
            SensorKind::Orientation
        );
        assert_eq!(SensorKind::from_name("Location"), SensorKind::Unknown);
        assert_eq!(SensorKind::from_name("accelerometer"), SensorKind::Unknown);
        assert_eq!(SensorKind::from_name(""), SensorKind::Unknown);
    }

    #[test]
    fn test_sample_frame_parses() {
        let json = r#"{"timestamp":1624386177562,"sensors":[
            {"name":"Accelerometer","value0":0.09303284,"value1":-0.3250122,"value2":9.86026},
            {"name":"Gyroscope","value0":3.6621094E-4,"value1":2.746582E-4,"value2":-0.0011138916},
            {"name":"Orientation","value0":209.60489,"value1":1.9141718,"value2":0.57536465},
            {"name":"Location","value0":null,"value1":null,"value2":null}]}"#;

        let frame: SensorFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.timestamp, 1624386177562);
        assert_eq!(frame.sensors.len(), 4);
        assert_eq!(frame.sensors[0].name, "Accelerometer");
        assert_eq!(frame.sensors[3].value0, None);
    }

    #[test]
    fn test_frame_without_sensors_parses_empty() {
        let frame: SensorFrame = serde_json::from_str(r#"{"timestamp":1}"#).unwrap();
        assert!(frame.sensors.is_empty());
    }

    #[test]
    fn test_quaternion_identity_from_zero_angles() {
        let q = Quaternion::from_euler(0.0, 0.0, 0.0);
        assert!((q.x - Quaternion::IDENTITY.x).abs() < EPS);
        assert!((q.y - Quaternion::IDENTITY.y).abs() < EPS);
        assert!((q.z - Quaternion::IDENTITY.z).abs() < EPS);
        assert!((q.w - Quaternion::IDENTITY.w).abs() < EPS);
    }

    #[test]
    fn test_quaternion_pure_yaw_90() {
        // 90° about Z only: (0, 0, sin 45°, cos 45°)
        let q = Quaternion::from_euler(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let half = std::f64::consts::FRAC_1_SQRT_2;
        assert!(q.x.abs() < EPS);
        assert!(q.y.abs() < EPS);
        assert!((q.z - half).abs() < EPS);
        assert!((q.w - half).abs() < EPS);
    }

    #[test]
    fn test_quaternion_pure_roll_180() {
        // 180° about X: (±1, 0, 0, 0)
        let q = Quaternion::from_euler(std::f64::consts::PI, 0.0, 0.0);
        assert!((q.x.abs() - 1.0).abs() < EPS);
        assert!(q.y.abs() < EPS);
        assert!(q.z.abs() < EPS);
        assert!(q.w.abs() < EPS);
    }

    #[test]
    fn test_imu_record_serializes_round_trip() {
        let record = ImuRecord {
            frame_id: "imu".to_string(),
            timestamp: Utc::now(),
            orientation: Quaternion::from_euler(0.1, 0.2, 0.3),
            orientation_covariance: [0.001; 9],
            angular_velocity: Vec3::new(0.1, 0.2, 0.3),
            angular_velocity_covariance: [0.0025; 9],
            linear_acceleration: Vec3::new(0.0, 0.0, 9.81),
            linear_acceleration_covariance: [0.01; 9],
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ImuRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frame_id, "imu");
        assert_eq!(back.orientation, record.orientation);
        assert_eq!(back.linear_acceleration, record.linear_acceleration);
    }
}
