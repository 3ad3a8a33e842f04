//! Frame source abstraction for sensor stream ingestion.
//!
//! A [`FrameSource`] yields text frames one at a time until the underlying
//! transport closes. The dispatcher loop calls [`next_frame`] in a select!
//! with cancellation; it is the loop's only suspension point.
//!
//! [`next_frame`]: FrameSource::next_frame

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;

/// Events produced by a frame source.
pub enum FrameEvent {
    /// One complete text frame.
    Frame(String),
    /// The peer closed the connection (or the replay ran out).
    Closed,
}

/// Trait abstracting where sensor frames come from.
///
/// `Err` means an unrecoverable transport fault; the dispatcher logs it and
/// shuts down that connection only.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next text frame.
    async fn next_frame(&mut self) -> Result<FrameEvent>;

    /// Human-readable name for logging (e.g. "websocket", "replay").
    fn source_name(&self) -> &str;
}

// ============================================================================
// WebSocket Source (live phone connection)
// ============================================================================

/// Adapts one accepted WebSocket into a frame source.
///
/// Control messages (ping/pong) and binary payloads are skipped — the phone
/// app only ever sends JSON text frames.
pub struct WebSocketSource {
    socket: WebSocket,
}

impl WebSocketSource {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<FrameEvent> {
        loop {
            match self.socket.next().await {
                None => return Ok(FrameEvent::Closed),
                Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket transport error: {}", e)),
                Some(Ok(Message::Text(text))) => return Ok(FrameEvent::Frame(text)),
                Some(Ok(Message::Close(_))) => return Ok(FrameEvent::Closed),
                Some(Ok(_)) => continue,
            }
        }
    }

    fn source_name(&self) -> &str {
        "websocket"
    }
}

// ============================================================================
// Replay Source (captured session playback)
// ============================================================================

/// Replays captured frames (one JSON envelope per line) with an optional
/// inter-frame delay.
///
/// Used by `--replay` to drive the bridge from a recorded phone session
/// without a device on the network.
pub struct ReplaySource {
    frames: std::vec::IntoIter<String>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<String>, delay_ms: u64) -> Self {
        Self {
            frames: frames.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// Load a capture file, skipping blank lines.
    pub fn from_file(path: &std::path::Path, delay_ms: u64) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let frames: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        Ok(Self::new(frames, delay_ms))
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<FrameEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.frames.next() {
            Some(frame) => {
                self.yielded_first = true;
                Ok(FrameEvent::Frame(frame))
            }
            None => Ok(FrameEvent::Closed),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}
