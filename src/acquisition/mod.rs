//! Sensor stream acquisition.
//!
//! Handles inbound phone connections: the WebSocket accept server, the
//! per-connection frame sources, and the dispatcher that routes sensor
//! entries into the shared motion state.

pub mod dispatcher;
pub mod server;
pub mod source;

pub use dispatcher::{DispatchError, IngestCounters, IngestSnapshot, StreamDispatcher};
pub use server::{ingest_router, local_ip, IngestState};
pub use source::{FrameEvent, FrameSource, ReplaySource, WebSocketSource};
