//! Per-room event batching and adaptive delivery
//!
//! Events are queued per room, flushed on a fixed cadence (or immediately
//! for critical events and full queues), ordered by priority then time,
//! pattern-compressed when that pays off, and reshaped per recipient
//! according to role and measured network conditions.

pub mod adapt;
pub mod batcher;
pub mod codec;
pub mod compress;
pub mod config;
pub mod monitor;
pub mod queue;
pub mod room;

pub use adapt::{adapt_batch_for_client, shape_for_recipient, simplify_for_player};
pub use batcher::{EventBatcher, SystemMetrics};
pub use codec::{CompressionAlgorithm, Compressor, WireCodec};
pub use compress::{compress_batch, compression_accepted, extract_patterns, fingerprint};
pub use config::BatchConfig;
pub use monitor::{FlushReport, MetricsSink, NoopMetricsSink};
pub use queue::{EnqueueOutcome, RoomBatch, RoomMetrics};
pub use room::DeliveryContext;

use tablesync_state::{RoomId, StateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Room {0} is not initialized for batching")]
    RoomNotInitialized(RoomId),

    #[error("Batch task for room {0} has stopped")]
    RoomClosed(RoomId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Codec error: {0}")]
    Codec(String),
}
