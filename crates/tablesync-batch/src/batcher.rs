//! Registry of room batch tasks
//!
//! `EventBatcher` maps room ids to running room tasks. Enqueueing is a
//! non-blocking mailbox send; everything that mutates a room's queues runs
//! on that room's task. The registry lock is never held across an await.

use crate::config::BatchConfig;
use crate::monitor::FlushReport;
use crate::queue::RoomMetrics;
use crate::room::{DeliveryContext, RoomCommand, RoomHandle};
use crate::BatchError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tablesync_state::{Event, EventPayload, Priority, RoomId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Aggregate over every active room
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_rooms: usize,
    /// Sockets known to the shared metrics store
    pub total_clients: usize,
    pub total_events: u64,
    pub total_batches: u64,
    pub total_bytes: u64,
    pub average_events_per_batch: f64,
    pub average_bytes_per_batch: f64,
}

pub struct EventBatcher {
    config: Arc<BatchConfig>,
    ctx: DeliveryContext,
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
}

impl EventBatcher {
    pub fn new(config: BatchConfig, ctx: DeliveryContext) -> Self {
        Self {
            config: Arc::new(config),
            ctx,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Tunables shared by every room task
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Start batching for a room. Returns false if it was already active.
    /// A room whose task died is replaced by a fresh one.
    ///
    /// Spawns the room task, so this must be called from within a Tokio
    /// runtime.
    pub fn initialize_room(&self, room_id: &str) -> bool {
        let total = {
            let mut rooms = self.rooms.lock();
            if self.live_handle(&mut rooms, room_id).is_some() {
                return false;
            }
            let handle = RoomHandle::spawn(room_id, self.config.clone(), self.ctx.clone());
            rooms.insert(room_id.to_string(), handle);
            rooms.len()
        };

        if total % 3 == 0 {
            info!(room_id = %room_id, total_rooms = total, "Initialized batching for room");
        } else {
            debug!(room_id = %room_id, total_rooms = total, "Initialized batching for room");
        }
        true
    }

    /// True while the room has a running task
    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms
            .lock()
            .get(room_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of rooms with a running task
    pub fn room_count(&self) -> usize {
        self.rooms
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stamp a payload with the current time and enqueue it.
    /// Returns false (and logs) when the room is not initialized.
    pub fn add_event(&self, room_id: &str, payload: EventPayload, priority: Priority) -> bool {
        let event = Event::new(payload, priority, self.ctx.clock.now_ms());
        self.push_event(room_id, event)
    }

    /// Enqueue an already-built event
    pub fn push_event(&self, room_id: &str, event: Event) -> bool {
        match self.try_push_event(room_id, event) {
            Ok(()) => true,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Dropping event");
                false
            }
        }
    }

    pub fn try_push_event(&self, room_id: &str, event: Event) -> Result<(), BatchError> {
        let mut rooms = self.rooms.lock();
        let handle = self
            .live_handle(&mut rooms, room_id)
            .ok_or_else(|| BatchError::RoomNotInitialized(room_id.to_string()))?;
        let sent = handle.send(RoomCommand::Enqueue(event));
        if sent.is_err() {
            self.evict(&mut rooms, room_id);
        }
        sent
    }

    /// Flush a room now. `Ok(None)` means the queues were empty and the
    /// flush was not forced.
    pub async fn flush_batch(
        &self,
        room_id: &str,
        force: bool,
    ) -> Result<Option<FlushReport>, BatchError> {
        let tx = self.sender(room_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::Flush {
            force,
            reply: reply_tx,
        })
        .map_err(|_| BatchError::RoomClosed(room_id.to_string()))?;

        reply_rx
            .await
            .map_err(|_| BatchError::RoomClosed(room_id.to_string()))
    }

    /// Flush what is left, stop the room task and forget the room.
    /// Returns the final metrics, or `None` if the room was not active.
    pub async fn cleanup_room(&self, room_id: &str) -> Option<RoomMetrics> {
        let handle = self.rooms.lock().remove(room_id)?;

        match handle.shutdown().await {
            Ok(metrics) => {
                debug!(
                    room_id = %room_id,
                    batches_sent = metrics.batches_sent,
                    total_events = metrics.total_events,
                    "Cleaned up batching for room"
                );
                Some(metrics)
            }
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Room task ended before cleanup");
                self.ctx.monitor.record_failure(room_id, &e.to_string());
                None
            }
        }
    }

    /// Snapshot of one room's counters, `None` if the room is not active
    pub async fn room_metrics(&self, room_id: &str) -> Option<RoomMetrics> {
        let tx = self.sender(room_id).ok()?;
        query_metrics(&tx).await
    }

    /// Totals across every active room
    pub async fn system_metrics(&self) -> SystemMetrics {
        let senders: Vec<_> = self
            .rooms
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .map(RoomHandle::sender)
            .collect();

        let mut metrics = SystemMetrics {
            total_rooms: senders.len(),
            total_clients: self.ctx.metrics.len(),
            ..SystemMetrics::default()
        };
        for tx in &senders {
            if let Some(room) = query_metrics(tx).await {
                metrics.total_events += room.total_events;
                metrics.total_batches += room.batches_sent;
                metrics.total_bytes += room.bytes_transferred;
            }
        }
        if metrics.total_batches > 0 {
            let batches = metrics.total_batches as f64;
            metrics.average_events_per_batch = metrics.total_events as f64 / batches;
            metrics.average_bytes_per_batch = metrics.total_bytes as f64 / batches;
        }
        metrics
    }

    /// Clean up every room
    pub async fn close(&self) {
        let rooms: Vec<RoomId> = self.rooms.lock().keys().cloned().collect();
        for room_id in rooms {
            self.cleanup_room(&room_id).await;
        }
    }

    fn sender(&self, room_id: &str) -> Result<mpsc::UnboundedSender<RoomCommand>, BatchError> {
        let mut rooms = self.rooms.lock();
        self.live_handle(&mut rooms, room_id)
            .map(RoomHandle::sender)
            .ok_or_else(|| BatchError::RoomNotInitialized(room_id.to_string()))
    }

    /// The room's handle if its task is still running. A dead task is
    /// evicted so the room can be initialized again.
    fn live_handle<'a>(
        &self,
        rooms: &'a mut HashMap<RoomId, RoomHandle>,
        room_id: &str,
    ) -> Option<&'a RoomHandle> {
        if rooms.get(room_id).is_some_and(RoomHandle::is_finished) {
            self.evict(rooms, room_id);
        }
        rooms.get(room_id)
    }

    fn evict(&self, rooms: &mut HashMap<RoomId, RoomHandle>, room_id: &str) {
        if rooms.remove(room_id).is_some() {
            error!(room_id = %room_id, "Room batch task stopped unexpectedly, evicting room");
            self.ctx
                .monitor
                .record_failure(room_id, "room batch task stopped unexpectedly");
        }
    }
}

async fn query_metrics(tx: &mpsc::UnboundedSender<RoomCommand>) -> Option<RoomMetrics> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(RoomCommand::Metrics(reply_tx)).ok()?;
    reply_rx.await.ok()
}
