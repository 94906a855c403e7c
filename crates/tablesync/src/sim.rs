//! Simulated tabletop session driving the full sync pipeline
//!
//! Opens a number of rooms, attaches simulated clients under a chosen
//! network profile, and for the configured duration generates token moves,
//! chat, client inputs and authoritative snapshots. Every delivered batch is
//! pushed through the wire codec so the byte counts reflect what a
//! transport would send.

use crate::config::SyncConfig;
use crate::service::SyncService;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablesync_batch::{CompressionAlgorithm, FlushReport, MetricsSink, WireCodec};
use tablesync_state::{
    BatchPacket, BatchSink, ClientInput, DeliveryError, EventPayload, GameState, InputAction,
    MeasuredMetrics, Priority, Role, SystemClock, Vec2,
};
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum NetworkProfile {
    Lan,
    Broadband,
    Mobile,
    Poor,
}

impl NetworkProfile {
    /// (latency ms, jitter ms, packet loss, bandwidth bps)
    fn baseline(self) -> (f64, f64, f64, f64) {
        match self {
            NetworkProfile::Lan => (5.0, 1.0, 0.0, 100_000_000.0),
            NetworkProfile::Broadband => (40.0, 6.0, 0.005, 20_000_000.0),
            NetworkProfile::Mobile => (150.0, 50.0, 0.02, 1_000_000.0),
            NetworkProfile::Poor => (500.0, 200.0, 0.10, 56_000.0),
        }
    }

    fn sample(self, rng: &mut impl Rng) -> MeasuredMetrics {
        let (latency, jitter, loss, bandwidth) = self.baseline();
        let noise = rng.gen_range(-jitter..=jitter);
        MeasuredMetrics::new((latency + noise).max(0.0), jitter, loss).with_bandwidth(bandwidth)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tablesync simulator - drives a simulated tabletop session")]
pub struct Args {
    /// Number of rooms
    #[arg(short, long, default_value = "2")]
    rooms: usize,

    /// Clients per room (the first one is the game master)
    #[arg(short, long, default_value = "4")]
    clients: usize,

    /// Network profile applied to every client
    #[arg(short, long, value_enum, default_value = "broadband")]
    network: NetworkProfile,

    /// Simulated session length in seconds
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Simulation step in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Role of every client after the first
    #[arg(long, value_enum, default_value_t = Role::Player)]
    role: Role,

    /// Priority of simulated chat messages
    #[arg(long, value_enum, default_value_t = Priority::Low)]
    chat_priority: Priority,

    /// Use one wire compression for every frame instead of choosing by size
    #[arg(long, value_enum)]
    codec: Option<CompressionAlgorithm>,

    /// Authoritative snapshot every N ticks
    #[arg(long, default_value = "4")]
    snapshot_every: u64,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the flush cadence
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Override the queue length that forces a flush
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

/// Encodes every delivered batch and tallies the wire bytes
#[derive(Debug)]
struct CodecSink {
    codec: WireCodec,
    frames: AtomicU64,
    wire_bytes: AtomicU64,
    lz4_frames: AtomicU64,
}

impl CodecSink {
    fn new(forced: Option<CompressionAlgorithm>) -> Self {
        let codec = match forced {
            Some(CompressionAlgorithm::Lz4) => WireCodec::new().with_threshold(usize::MAX),
            Some(CompressionAlgorithm::Zstd) => WireCodec::new().with_threshold(0),
            None => WireCodec::new(),
        };
        Self {
            codec,
            frames: AtomicU64::new(0),
            wire_bytes: AtomicU64::new(0),
            lz4_frames: AtomicU64::new(0),
        }
    }
}

impl BatchSink for CodecSink {
    fn send_batch(&self, socket_id: &str, packet: &BatchPacket) -> Result<(), DeliveryError> {
        let frame = self
            .codec
            .encode(packet)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if matches!(
            WireCodec::frame_algorithm(&frame),
            Ok(CompressionAlgorithm::Lz4)
        ) {
            self.lz4_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.wire_bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        trace!(
            socket_id = %socket_id,
            events = packet.event_count,
            bytes = frame.len(),
            "batch_update"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogMonitor {
    flushes: AtomicU64,
    forced: AtomicU64,
}

impl MetricsSink for LogMonitor {
    fn record_flush(&self, report: &FlushReport) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        if report.forced {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure(&self, room_id: &str, error: &str) {
        warn!(room_id = %room_id, error = %error, "Room failure");
    }
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(interval) = args.flush_interval_ms {
        config.batch.flush_interval_ms = interval;
    }
    if let Some(size) = args.max_batch_size {
        config.batch.max_batch_size = size;
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.log.level);

    let sink = Arc::new(CodecSink::new(args.codec));
    let monitor = Arc::new(LogMonitor::default());
    let service = SyncService::new(config, sink.clone(), monitor.clone(), SystemClock::shared());

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut boards = Vec::with_capacity(args.rooms);
    for r in 0..args.rooms {
        let room_id = format!("room-{r}");
        service.open_room(&room_id);

        let mut board = GameState::new();
        for c in 0..args.clients {
            let socket_id = format!("{room_id}-client-{c}");
            let role = if c == 0 { Role::GameMaster } else { args.role };
            service.join(&room_id, &socket_id, role);
            board = board.with_token(format!("token-{c}"), Vec2::new(c as f64, 0.0));
        }
        service.confirm_state(&room_id, board.clone());
        boards.push((room_id, board));
    }

    info!(
        rooms = args.rooms,
        clients = args.clients,
        network = ?args.network,
        "Simulation started"
    );

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let total_ticks = args.duration * 1000 / tick.as_millis() as u64;
    let mut interval = tokio::time::interval(tick);
    let mut corrections = 0usize;

    for step in 0..total_ticks {
        interval.tick().await;

        for (room_id, board) in boards.iter_mut() {
            simulate_room(&service, &mut rng, room_id, board, &args, step);

            if args.snapshot_every > 0 && step % args.snapshot_every == 0 {
                let issued = service.confirm_state(room_id, board.clone());
                corrections += issued.len();
                for correction in &issued {
                    debug!(
                        socket_id = %correction.socket_id,
                        discrepancy = correction.discrepancy,
                        replay = correction.pending_inputs.len(),
                        "Correction"
                    );
                }
            }
        }
    }

    let metrics = service.system_metrics().await;
    info!(
        total_events = metrics.batching.total_events,
        total_batches = metrics.batching.total_batches,
        json_bytes = metrics.batching.total_bytes,
        avg_events_per_batch = metrics.batching.average_events_per_batch,
        avg_latency = metrics.prediction.avg_latency,
        pending_inputs = metrics.prediction.total_pending_inputs,
        corrections,
        "Batching summary"
    );
    info!(
        frames = sink.frames.load(Ordering::Relaxed),
        lz4_frames = sink.lz4_frames.load(Ordering::Relaxed),
        wire_bytes = sink.wire_bytes.load(Ordering::Relaxed),
        flushes = monitor.flushes.load(Ordering::Relaxed),
        forced_flushes = monitor.forced.load(Ordering::Relaxed),
        "Delivery summary"
    );

    service.shutdown().await;
    Ok(())
}

/// One tick of activity in a room: the authority moves a token, a client
/// sends an input, and now and then something urgent happens.
fn simulate_room(
    service: &SyncService,
    rng: &mut StdRng,
    room_id: &str,
    board: &mut GameState,
    args: &Args,
    step: u64,
) {
    if args.clients == 0 {
        return;
    }
    let c = rng.gen_range(0..args.clients);
    let socket_id = format!("{room_id}-client-{c}");
    let token_id = format!("token-{c}");

    let velocity = Vec2::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0));
    let from = board.token_position(&token_id).unwrap_or_default();
    let to = from.advanced(&velocity, 0.25);

    let input = ClientInput::new(InputAction::TokenMove {
        token_id: token_id.clone(),
        position: Some(to),
        velocity: Some(velocity),
    });
    service.submit_input(&socket_id, input);

    // The authority lands near, but not exactly on, the client's guess
    let drift = Vec2::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5));
    let landed = to.advanced(&drift, 1.0);
    board.tokens.entry(token_id.clone()).or_default().position = Some(landed);
    service.submit_event(
        room_id,
        EventPayload::TokenMoved {
            token_id,
            position: landed,
            velocity: Some(velocity),
        },
        Priority::Normal,
    );

    if rng.gen_bool(0.2) {
        service.submit_event(
            room_id,
            EventPayload::ChatMessage {
                sender: socket_id.clone(),
                content: format!("step {step}"),
            },
            args.chat_priority,
        );
    }
    if rng.gen_bool(0.02) {
        service.submit_event(
            room_id,
            EventPayload::Custom {
                name: "initiative_rolled".to_string(),
                data: serde_json::json!({ "by": socket_id }),
            },
            Priority::Critical,
        );
    }
    if step % 10 == 0 {
        service.report_metrics(&socket_id, &args.network.sample(rng));
    }
}
