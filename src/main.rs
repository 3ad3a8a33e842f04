//! imu-bridge — phone sensor stream to IMU record bridge.
//!
//! Serves a WebSocket endpoint that a phone sensor app streams JSON frames
//! to, reassembles the readings into one IMU record, and republishes it on
//! the process-wide record channel once complete.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default port (5000)
//! imu-bridge
//!
//! # Custom port and frame label
//! imu-bridge --port 6000 --frame-id phone_imu
//!
//! # Replay a captured session (one JSON frame per line)
//! imu-bridge --replay session.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `IMU_BRIDGE_CONFIG`: Path to a TOML config file
//! - `RUST_LOG`: Logging level (default: info; `debug` shows published records)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use imu_bridge::acquisition::{self, IngestState, ReplaySource, StreamDispatcher};
use imu_bridge::config::{defaults, BridgeConfig};
use imu_bridge::imu::MotionState;
use imu_bridge::publish::BroadcastSink;
use imu_bridge::types::ImuRecord;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "imu-bridge")]
#[command(about = "Phone sensor stream to IMU record bridge")]
#[command(version)]
struct CliArgs {
    /// Override the bind address (default: "0.0.0.0")
    #[arg(long)]
    addr: Option<String>,

    /// Override the listening port (default: 5000)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a TOML config file (overrides the standard search order)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Override the coordinate frame label on published records
    #[arg(long)]
    frame_id: Option<String>,

    /// Replay captured frames from a file (one JSON frame per line)
    /// instead of serving a WebSocket endpoint
    #[arg(long, value_name = "PATH")]
    replay: Option<String>,

    /// Inter-frame delay for replay mode (milliseconds)
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    WsServer,
    RecordLogger,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::WsServer => write!(f, "WsServer"),
            TaskName::RecordLogger => write!(f, "RecordLogger"),
        }
    }
}

// ============================================================================
// Task Spawners
// ============================================================================

/// Spawn the WebSocket server task into the JoinSet.
fn spawn_ws_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[WsServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[WsServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[WsServer] Graceful shutdown complete");
                Ok(TaskName::WsServer)
            }
            Err(e) => {
                error!("[WsServer] Server error: {}", e);
                Err(anyhow::anyhow!("WebSocket server error: {}", e))
            }
        }
    });
}

/// Spawn the record logger: the in-process subscriber on the record topic.
///
/// Keeps the broadcast channel alive and logs each published record at
/// debug level, standing in for downstream consumers.
fn spawn_record_logger(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut rx: tokio::sync::broadcast::Receiver<ImuRecord>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[RecordLogger] Task starting");
        let mut records_seen = 0u64;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("[RecordLogger] Shutdown signal received after {} records", records_seen);
                    return Ok(TaskName::RecordLogger);
                }
                result = rx.recv() => match result {
                    Ok(record) => {
                        records_seen += 1;
                        debug!(
                            frame_id = %record.frame_id,
                            qx = record.orientation.x,
                            qy = record.orientation.y,
                            qz = record.orientation.z,
                            qw = record.orientation.w,
                            ax = record.linear_acceleration.x,
                            ay = record.linear_acceleration.y,
                            az = record.linear_acceleration.z,
                            gx = record.angular_velocity.x,
                            gy = record.angular_velocity.y,
                            gz = record.angular_velocity.z,
                            "Record published"
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[RecordLogger] Lagged — skipped {} records", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("[RecordLogger] Record channel closed after {} records", records_seen);
                        return Ok(TaskName::RecordLogger);
                    }
                }
            }
        }
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        match task_set.join_next().await {
            Some(Ok(Ok(task_name))) => {
                info!("Supervisor: Task {} completed normally", task_name);
            }
            Some(Ok(Err(e))) => {
                error!("Supervisor: Task failed with error: {}", e);
                cancel_token.cancel();
                return Err(e);
            }
            Some(Err(e)) => {
                error!("Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
            None => {
                info!("Supervisor: All tasks completed");
                return Ok(());
            }
        }
    }
}

// ============================================================================
// Modes
// ============================================================================

/// Serve the WebSocket endpoint until shutdown.
async fn run_server(
    config: &BridgeConfig,
    motion: Arc<MotionState>,
    rx: tokio::sync::broadcast::Receiver<ImuRecord>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let bound = listener
        .local_addr()
        .context("Failed to read bound address")?;
    acquisition::server::log_endpoints(&bound);

    let ingest_state = IngestState::new(motion, cancel_token.clone());
    let app = acquisition::ingest_router(ingest_state);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_ws_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_record_logger(&mut task_set, rx, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await
}

/// Replay a captured session through the dispatcher, then exit.
async fn run_replay(
    path: &str,
    delay_ms: u64,
    motion: Arc<MotionState>,
    rx: tokio::sync::broadcast::Receiver<ImuRecord>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("📥 Input: replay from {}", path);
    let mut source = ReplaySource::from_file(std::path::Path::new(path), delay_ms)
        .with_context(|| format!("Failed to load replay file {}", path))?;

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_record_logger(&mut task_set, rx, cancel_token.clone());

    let counters = Arc::new(imu_bridge::IngestCounters::default());
    let dispatcher = StreamDispatcher::new(Arc::clone(&motion), Arc::clone(&counters), 1);
    dispatcher.run(&mut source, cancel_token.clone()).await;

    let snapshot = counters.snapshot();
    info!("");
    info!("📊 Replay complete");
    info!("   Frames received:   {}", snapshot.frames_received);
    info!("   Frames dropped:    {}", snapshot.frames_dropped);
    info!("   Entries routed:    {}", snapshot.entries_routed);
    info!("   Entries ignored:   {}", snapshot.entries_ignored);
    info!("   Entries failed:    {}", snapshot.entries_failed);
    info!("   Records published: {}", motion.records_published());

    cancel_token.cancel();
    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load configuration, then apply CLI overrides
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(std::path::Path::new(path))
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => BridgeConfig::load(),
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(frame_id) = args.frame_id {
        config.imu.frame_id = frame_id;
    }
    config.validate().context("Invalid configuration")?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  imu-bridge — Phone Sensor Stream to IMU Records");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "  Frame: {} | Bind: {}",
        config.imu.frame_id,
        config.bind_addr()
    );
    info!("");

    // Record topic + shared motion state (one per process run)
    let (sink, rx) = BroadcastSink::new(defaults::RECORD_CHANNEL_CAPACITY);
    let motion = Arc::new(MotionState::new(
        config.imu.frame_id.clone(),
        config.imu.covariances(),
        Arc::new(sink),
    ));

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    if let Some(replay_path) = args.replay {
        run_replay(
            &replay_path,
            args.replay_delay_ms,
            motion,
            rx,
            cancel_token,
        )
        .await?;
    } else {
        run_server(&config, motion, rx, cancel_token).await?;
    }

    info!("");
    info!("✓ imu-bridge shutdown complete");
    Ok(())
}
