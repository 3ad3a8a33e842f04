//! WebSocket accept server — the thin transport wrapper around the
//! dispatcher.
//!
//! Exposes two routes:
//! - `GET /sensors` — WebSocket upgrade; one [`StreamDispatcher`] per
//!   accepted connection, all sharing the process-wide [`MotionState`].
//! - `GET /api/status` — ingest and publish counters as JSON.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::dispatcher::{IngestCounters, IngestSnapshot, StreamDispatcher};
use super::source::WebSocketSource;
use crate::imu::{Completeness, MotionState};

/// Shared handles for the ingest endpoints.
#[derive(Clone)]
pub struct IngestState {
    pub motion: Arc<MotionState>,
    pub counters: Arc<IngestCounters>,
    pub cancel: CancellationToken,
}

impl IngestState {
    pub fn new(motion: Arc<MotionState>, cancel: CancellationToken) -> Self {
        Self {
            motion,
            counters: Arc::new(IngestCounters::default()),
            cancel,
        }
    }
}

/// Build the ingest router.
pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/sensors", get(sensors_ws))
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /sensors — upgrade to a WebSocket and hand the connection to a
/// dispatcher.
async fn sensors_ws(ws: WebSocketUpgrade, State(state): State<IngestState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: IngestState) {
    let id = state
        .counters
        .connections_opened
        .fetch_add(1, Ordering::Relaxed)
        + 1;
    state
        .counters
        .connections_active
        .fetch_add(1, Ordering::Relaxed);

    let mut source = WebSocketSource::new(socket);
    let dispatcher =
        StreamDispatcher::new(Arc::clone(&state.motion), Arc::clone(&state.counters), id);
    dispatcher.run(&mut source, state.cancel.clone()).await;

    state
        .counters
        .connections_active
        .fetch_sub(1, Ordering::Relaxed);
}

// ============================================================================
// Status API
// ============================================================================

/// Bridge health counters for operators.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub frame_id: String,
    #[serde(flatten)]
    pub ingest: IngestSnapshot,
    pub completeness: Completeness,
    pub records_published: u64,
    pub last_publish: Option<DateTime<Utc>>,
}

/// GET /api/status
async fn status(State(state): State<IngestState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        frame_id: state.motion.frame_id().to_string(),
        ingest: state.counters.snapshot(),
        completeness: state.motion.completeness(),
        records_published: state.motion.records_published(),
        last_publish: state.motion.last_publish(),
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Best-effort discovery of the machine's outbound IP, for the startup
/// banner (the operator points the phone app at this address).
///
/// Connecting a UDP socket selects the routing interface without sending
/// any packets; the target does not need to be reachable.
pub fn local_ip() -> Option<std::net::IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.255.255.255:1").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Log the endpoints a freshly bound server is reachable on.
pub fn log_endpoints(bound: &std::net::SocketAddr) {
    info!("✓ Listening on {}", bound);
    let display_host = match local_ip() {
        Some(ip) if bound.ip().is_unspecified() => ip.to_string(),
        _ => bound.ip().to_string(),
    };
    info!("");
    info!(
        "🎯 Phone endpoint:  ws://{}:{}/sensors",
        display_host,
        bound.port()
    );
    info!(
        "   Status API:      http://{}:{}/api/status",
        display_host,
        bound.port()
    );
    info!("");
}
