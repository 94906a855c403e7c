//! Monitoring side channel for flush activity and shard failures

use tablesync_state::RoomId;

/// Outcome of one room flush
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub room_id: RoomId,
    pub event_count: usize,
    /// Serialized size of the room-wide packet
    pub bytes: usize,
    pub recipients: usize,
    pub failed_recipients: usize,
    pub forced: bool,
}

/// Receives flush reports and per-room failures. Implementations must be
/// cheap; they run on the room's task.
pub trait MetricsSink: Send + Sync {
    fn record_flush(&self, report: &FlushReport);

    fn record_failure(&self, room_id: &str, error: &str) {
        let _ = (room_id, error);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_flush(&self, _report: &FlushReport) {}
}
