//! Room task: the single owner of a room's batch state
//!
//! Producers talk to the task through an unbounded mailbox; the task
//! applies enqueues in order, runs the periodic flush, and stops after a
//! final flush when told to shut down or when every sender is gone.

use crate::adapt::shape_for_recipient;
use crate::compress::compress_batch;
use crate::config::BatchConfig;
use crate::monitor::{FlushReport, MetricsSink};
use crate::queue::{EnqueueOutcome, RoomBatch, RoomMetrics};
use crate::BatchError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tablesync_state::{
    BatchPacket, BatchSink, Event, NetworkMetricsStore, RoleResolver, RoomDirectory, RoomId,
    SharedClock,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Everything a room task needs from the outside world
#[derive(Clone)]
pub struct DeliveryContext {
    pub directory: Arc<dyn RoomDirectory>,
    pub roles: Arc<dyn RoleResolver>,
    pub sink: Arc<dyn BatchSink>,
    pub monitor: Arc<dyn MetricsSink>,
    pub metrics: NetworkMetricsStore,
    pub clock: SharedClock,
}

pub(crate) enum RoomCommand {
    Enqueue(Event),
    Flush {
        force: bool,
        reply: oneshot::Sender<Option<FlushReport>>,
    },
    Metrics(oneshot::Sender<RoomMetrics>),
    Shutdown(oneshot::Sender<RoomMetrics>),
}

/// Lifecycle handle for a running room task
pub(crate) struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::UnboundedSender<RoomCommand>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub(crate) fn spawn(room_id: &str, config: Arc<BatchConfig>, ctx: DeliveryContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RoomActor {
            batch: RoomBatch::new(room_id, ctx.clock.now_ms()),
            room_id: room_id.to_string(),
            config,
            ctx,
            rx,
        };
        let task = tokio::spawn(actor.run());
        Self {
            room_id: room_id.to_string(),
            tx,
            task,
        }
    }

    /// True once the task has exited, normally or by panicking
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<RoomCommand> {
        self.tx.clone()
    }

    pub(crate) fn send(&self, command: RoomCommand) -> Result<(), BatchError> {
        self.tx
            .send(command)
            .map_err(|_| BatchError::RoomClosed(self.room_id.clone()))
    }

    /// Final flush, then wait for the task to exit. No flush can run after
    /// this returns.
    pub(crate) async fn shutdown(self) -> Result<RoomMetrics, BatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.tx.send(RoomCommand::Shutdown(reply_tx)).is_ok();
        drop(self.tx);

        let metrics = if sent { reply_rx.await.ok() } else { None };
        if let Err(e) = self.task.await {
            error!(room_id = %self.room_id, error = %e, "Room batch task failed");
        }
        metrics.ok_or(BatchError::RoomClosed(self.room_id))
    }
}

struct RoomActor {
    room_id: RoomId,
    batch: RoomBatch,
    config: Arc<BatchConfig>,
    ctx: DeliveryContext,
    rx: mpsc::UnboundedReceiver<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        let period = self.config.flush_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = self.rx.recv() => match command {
                    Some(command) => {
                        if !self.handle(command) {
                            break;
                        }
                    }
                    None => {
                        self.flush(false);
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.flush(false);
                }
            }
        }

        debug!(room_id = %self.room_id, "Room batch task stopped");
    }

    /// Returns false once the task should stop
    fn handle(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Enqueue(event) => {
                if let EnqueueOutcome::FlushNow { force } =
                    self.batch.push(event, self.config.max_batch_size)
                {
                    self.flush(force);
                }
            }
            RoomCommand::Flush { force, reply } => {
                let report = self.flush(force);
                let _ = reply.send(report);
            }
            RoomCommand::Metrics(reply) => {
                let _ = reply.send(self.batch.metrics());
            }
            RoomCommand::Shutdown(reply) => {
                self.flush(false);
                let _ = reply.send(self.batch.metrics());
                return false;
            }
        }
        true
    }

    fn flush(&mut self, force: bool) -> Option<FlushReport> {
        let now = self.ctx.clock.now_ms();
        let packet = self.batch.take_packet(now, force)?;
        let packet = compress_batch(&packet, false, now, &self.config);

        let bytes = match packet.serialized_len() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Could not size batch packet");
                0
            }
        };

        let (recipients, failed_recipients) = self.deliver(&packet, now);
        self.batch.record_sent(packet.event_count, bytes);

        let report = FlushReport {
            room_id: self.room_id.clone(),
            event_count: packet.event_count,
            bytes,
            recipients,
            failed_recipients,
            forced: force,
        };
        if report.event_count > 0 {
            debug!(
                room_id = %self.room_id,
                events = report.event_count,
                bytes = report.bytes,
                recipients = report.recipients,
                "Batch sent"
            );
        }
        self.ctx.monitor.record_flush(&report);
        Some(report)
    }

    /// Send a role/metrics-shaped copy to every socket in the room.
    /// A failing or panicking socket is logged and skipped.
    fn deliver(&self, packet: &BatchPacket, now: u64) -> (usize, usize) {
        let sockets = self.ctx.directory.sockets_in(&self.room_id);
        let mut failed = 0;

        for socket_id in &sockets {
            let sent = catch_unwind(AssertUnwindSafe(|| {
                let role = self.ctx.roles.role(socket_id);
                let metrics = self.ctx.metrics.get_or_default(socket_id, now);
                let shaped = shape_for_recipient(packet, role, &metrics, now, &self.config);
                self.ctx.sink.send_batch(socket_id, &shaped)
            }));

            let error = match sent {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    warn!(
                        room_id = %self.room_id,
                        socket_id = %socket_id,
                        error = %e,
                        "Batch delivery failed"
                    );
                    e.to_string()
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        room_id = %self.room_id,
                        socket_id = %socket_id,
                        panic = %message,
                        "Batch delivery panicked"
                    );
                    format!("delivery to {socket_id} panicked: {message}")
                }
            };
            failed += 1;
            self.report_failure(&error);
        }

        (sockets.len(), failed)
    }

    fn report_failure(&self, error: &str) {
        let reported = catch_unwind(AssertUnwindSafe(|| {
            self.ctx.monitor.record_failure(&self.room_id, error)
        }));
        if reported.is_err() {
            error!(room_id = %self.room_id, "Metrics sink panicked while recording a failure");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
