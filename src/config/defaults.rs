//! System-wide default constants.
//!
//! Matches the original deployment values so a bare `imu-bridge` with no
//! config file behaves identically to the reference setup.

// ============================================================================
// Server
// ============================================================================

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default WebSocket listening port for the phone sensor stream.
pub const DEFAULT_PORT: u16 = 5000;

// ============================================================================
// IMU Record
// ============================================================================

/// Coordinate frame label stamped on published records.
pub const DEFAULT_FRAME_ID: &str = "imu";

/// Diagonal variance of the fixed linear-acceleration covariance, (m/s²)².
pub const DEFAULT_ACCEL_VARIANCE: f64 = 0.01;

/// Diagonal variance of the fixed angular-velocity covariance, (rad/s)².
pub const DEFAULT_GYRO_VARIANCE: f64 = 0.0025;

/// Diagonal variance of the fixed orientation covariance, rad².
pub const DEFAULT_ORIENT_VARIANCE: f64 = 0.001;

// ============================================================================
// Pub/Sub
// ============================================================================

/// Broadcast channel capacity for published records.
///
/// Slow subscribers lag past this depth and drop old records rather than
/// backpressure the ingest path.
pub const RECORD_CHANNEL_CAPACITY: usize = 64;
