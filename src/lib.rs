//! imu-bridge: phone sensor stream to IMU record bridge.
//!
//! Ingests a live sensor stream from a mobile device over a WebSocket,
//! reassembles it into a single motion-state record, and republishes that
//! record on a process-wide broadcast channel whenever a complete update is
//! available.
//!
//! ## Architecture
//!
//! - **Acquisition**: WebSocket accept server + per-connection dispatcher
//! - **MotionState**: partial-update aggregation with a completeness gate
//! - **Publish**: narrow sink seam over a tokio broadcast topic

pub mod acquisition;
pub mod config;
pub mod imu;
pub mod publish;
pub mod types;

// Re-export configuration
pub use config::BridgeConfig;

// Re-export commonly used types
pub use types::{ImuRecord, Quaternion, SensorEntry, SensorFrame, SensorKind, Vec3};

// Re-export core components
pub use acquisition::{IngestCounters, IngestState, ReplaySource, StreamDispatcher};
pub use imu::{Completeness, Covariances, MotionState};
pub use publish::{BroadcastSink, RecordSink};
