//! Room batch state: two queues plus running delivery metrics
//!
//! Pure bookkeeping. The room task owns one `RoomBatch` and is the only
//! writer; nothing here touches timers or sockets.

use serde::Serialize;
use tablesync_state::{BatchEvent, BatchPacket, Event, Priority, RoomId};

/// What the caller must do after an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Flush right away; `force` emits even when nothing is queued
    FlushNow { force: bool },
}

/// Read-side snapshot of a room's batching activity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetrics {
    pub total_events: u64,
    pub batches_sent: u64,
    pub bytes_transferred: u64,
    pub average_batch_size: f64,
    pub current_batch_size: usize,
    pub last_flush: u64,
}

#[derive(Debug)]
pub struct RoomBatch {
    room_id: RoomId,
    events: Vec<Event>,
    high_priority: Vec<Event>,
    last_flush: u64,
    total_events: u64,
    batches_sent: u64,
    bytes_transferred: u64,
    average_batch_size: f64,
}

impl RoomBatch {
    pub fn new(room_id: impl Into<RoomId>, now_ms: u64) -> Self {
        Self {
            room_id: room_id.into(),
            events: Vec::new(),
            high_priority: Vec::new(),
            last_flush: now_ms,
            total_events: 0,
            batches_sent: 0,
            bytes_transferred: 0,
            average_batch_size: 0.0,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Queue an event and report whether it requires an immediate flush
    pub fn push(&mut self, event: Event, max_batch_size: usize) -> EnqueueOutcome {
        let priority = event.priority;
        if priority.is_urgent() {
            self.high_priority.push(event);
        } else {
            self.events.push(event);
        }
        self.total_events += 1;

        if priority == Priority::Critical {
            return EnqueueOutcome::FlushNow { force: true };
        }
        if self.pending() >= max_batch_size {
            return EnqueueOutcome::FlushNow { force: false };
        }
        EnqueueOutcome::Queued
    }

    pub fn pending(&self) -> usize {
        self.events.len() + self.high_priority.len()
    }

    pub fn last_flush(&self) -> u64 {
        self.last_flush
    }

    /// Drain both queues into an ordered packet.
    ///
    /// Returns `None` (leaving state untouched) when nothing is queued and
    /// the flush is not forced.
    pub fn take_packet(&mut self, now_ms: u64, force: bool) -> Option<BatchPacket> {
        if self.pending() == 0 && !force {
            return None;
        }

        let mut merged = std::mem::take(&mut self.high_priority);
        merged.append(&mut self.events);
        order_events(&mut merged);

        let mut packet = BatchPacket::new(
            self.room_id.clone(),
            now_ms,
            merged.into_iter().map(BatchEvent::from).collect(),
        );
        packet.metadata.batch_interval = Some(now_ms.saturating_sub(self.last_flush));
        packet.metadata.server_timestamp = Some(now_ms);

        self.last_flush = self.last_flush.max(now_ms);
        Some(packet)
    }

    /// Account for a delivered batch of `event_count` events
    pub fn record_sent(&mut self, event_count: usize, bytes: usize) {
        self.batches_sent += 1;
        self.bytes_transferred += bytes as u64;
        let n = self.batches_sent as f64;
        self.average_batch_size = (self.average_batch_size * (n - 1.0) + event_count as f64) / n;
    }

    pub fn metrics(&self) -> RoomMetrics {
        RoomMetrics {
            total_events: self.total_events,
            batches_sent: self.batches_sent,
            bytes_transferred: self.bytes_transferred,
            average_batch_size: self.average_batch_size,
            current_batch_size: self.pending(),
            last_flush: self.last_flush,
        }
    }
}

/// Priority-major, timestamp-minor ascending. Stable for ties.
pub fn order_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then(a.timestamp.cmp(&b.timestamp))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_state::EventPayload;

    fn chat(priority: Priority, timestamp: u64) -> Event {
        Event::new(
            EventPayload::ChatMessage {
                sender: "gm".to_string(),
                content: format!("msg@{timestamp}"),
            },
            priority,
            timestamp,
        )
    }

    #[test]
    fn test_size_trigger_boundary() {
        let mut batch = RoomBatch::new("r1", 0);
        for ts in 0..9 {
            assert_eq!(batch.push(chat(Priority::Normal, ts), 10), EnqueueOutcome::Queued);
        }
        assert_eq!(
            batch.push(chat(Priority::Normal, 9), 10),
            EnqueueOutcome::FlushNow { force: false }
        );
    }

    #[test]
    fn test_critical_forces_flush() {
        let mut batch = RoomBatch::new("r1", 0);
        assert_eq!(
            batch.push(chat(Priority::Critical, 1), 10),
            EnqueueOutcome::FlushNow { force: true }
        );
        assert_eq!(batch.metrics().total_events, 1);
    }

    #[test]
    fn test_empty_take_is_noop_unless_forced() {
        let mut batch = RoomBatch::new("r1", 100);
        assert!(batch.take_packet(150, false).is_none());
        assert_eq!(batch.last_flush(), 100);

        let forced = batch.take_packet(200, true).unwrap();
        assert_eq!(forced.event_count, 0);
        assert_eq!(forced.metadata.batch_interval, Some(100));
        assert_eq!(batch.last_flush(), 200);
    }

    #[test]
    fn test_take_orders_and_drains() {
        let mut batch = RoomBatch::new("r1", 0);
        batch.push(chat(Priority::Low, 1), 10);
        batch.push(chat(Priority::Normal, 5), 10);
        batch.push(chat(Priority::High, 9), 10);
        batch.push(chat(Priority::Normal, 2), 10);

        let packet = batch.take_packet(10, false).unwrap();
        let order: Vec<_> = packet
            .events
            .iter()
            .map(|e| (e.priority, e.timestamp.unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::High, 9),
                (Priority::Normal, 2),
                (Priority::Normal, 5),
                (Priority::Low, 1)
            ]
        );
        assert_eq!(batch.pending(), 0);
        assert!(batch.take_packet(20, false).is_none());
    }

    #[test]
    fn test_last_flush_never_moves_backwards() {
        let mut batch = RoomBatch::new("r1", 500);
        batch.push(chat(Priority::Normal, 1), 10);
        let packet = batch.take_packet(400, false).unwrap();
        assert_eq!(packet.metadata.batch_interval, Some(0));
        assert_eq!(batch.last_flush(), 500);
    }

    #[test]
    fn test_running_average() {
        let mut batch = RoomBatch::new("r1", 0);
        batch.record_sent(2, 100);
        batch.record_sent(4, 50);
        batch.record_sent(6, 10);
        let metrics = batch.metrics();
        assert_eq!(metrics.batches_sent, 3);
        assert_eq!(metrics.bytes_transferred, 160);
        assert_eq!(metrics.average_batch_size, 4.0);
    }
}
