use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batching and adaptation tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Periodic flush cadence per room
    pub flush_interval_ms: u64,

    /// Queue length that forces an out-of-cadence flush
    pub max_batch_size: usize,

    /// Latency above which a recipient only gets critical/high events
    pub high_latency_ms: f64,

    /// Bandwidth below which a recipient gets aggressive compression
    pub low_bandwidth_bps: f64,

    /// Compressed form is kept only when `compressed / original` is below this
    pub compression_accept_ratio: f64,

    /// Aggressive compression drops timestamps younger than this
    pub recent_event_ms: u64,

    /// Aggressive compression rounds positions to this many decimals
    pub position_decimals: i32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 200,
            max_batch_size: 10,
            high_latency_ms: 100.0,
            low_bandwidth_bps: 1_000_000.0,
            compression_accept_ratio: 0.9,
            recent_event_ms: 1_000,
            position_decimals: 2,
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}
