//! Service facade over the batcher and the prediction ledger

use crate::config::SyncConfig;
use crate::presence::PresenceRegistry;
use serde::Serialize;
use std::sync::Arc;
use tablesync_batch::{DeliveryContext, EventBatcher, MetricsSink, RoomMetrics, SystemMetrics};
use tablesync_predict::{
    CombatCorrection, Correction, LagCompensator, LedgerSystemMetrics, PredictedCombatAction,
    ProcessedInput,
};
use tablesync_state::{
    BatchSink, ClientInput, ClientNetworkMetrics, CombatAction, CombatState, EventPayload,
    GameState, MeasuredMetrics, NetworkMetricsStore, Priority, Role, SharedClock,
};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub batching: SystemMetrics,
    pub prediction: LedgerSystemMetrics,
}

pub struct SyncService {
    presence: Arc<PresenceRegistry>,
    metrics: NetworkMetricsStore,
    batcher: EventBatcher,
    ledger: LagCompensator,
    clock: SharedClock,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        sink: Arc<dyn BatchSink>,
        monitor: Arc<dyn MetricsSink>,
        clock: SharedClock,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let metrics = NetworkMetricsStore::new();

        let ctx = DeliveryContext {
            directory: presence.clone(),
            roles: presence.clone(),
            sink,
            monitor,
            metrics: metrics.clone(),
            clock: clock.clone(),
        };

        Self {
            batcher: EventBatcher::new(config.batch, ctx),
            ledger: LagCompensator::new(config.ledger, metrics.clone(), clock.clone()),
            presence,
            metrics,
            clock,
        }
    }

    pub fn batcher(&self) -> &EventBatcher {
        &self.batcher
    }

    pub fn ledger(&self) -> &LagCompensator {
        &self.ledger
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn metrics(&self) -> &NetworkMetricsStore {
        &self.metrics
    }

    /// Must be called from within a Tokio runtime
    pub fn open_room(&self, room_id: &str) -> bool {
        self.batcher.initialize_room(room_id)
    }

    /// Final flush, then release ledger state and membership for the room
    pub async fn close_room(&self, room_id: &str) -> Option<RoomMetrics> {
        let metrics = self.batcher.cleanup_room(room_id).await;
        let clients = self.ledger.cleanup_room(room_id);
        let sockets = self.presence.remove_room(room_id);
        debug!(
            room_id = %room_id,
            clients,
            sockets = sockets.len(),
            "Closed room"
        );
        metrics
    }

    pub fn join(&self, room_id: &str, socket_id: &str, role: Role) -> bool {
        if let Some(previous) = self.presence.join(room_id, socket_id, role) {
            debug!(socket_id = %socket_id, from = %previous, to = %room_id, "Socket changed rooms");
        }
        self.ledger.initialize_client(socket_id, room_id)
    }

    pub fn leave(&self, socket_id: &str) -> bool {
        let left = self.presence.leave(socket_id).is_some();
        let tracked = self.ledger.cleanup_client(socket_id);
        left || tracked
    }

    pub fn submit_event(&self, room_id: &str, payload: EventPayload, priority: Priority) -> bool {
        self.batcher.add_event(room_id, payload, priority)
    }

    pub fn submit_input(&self, socket_id: &str, input: ClientInput) -> Option<ProcessedInput> {
        self.ledger.process_client_input(socket_id, input)
    }

    pub fn submit_combat_action(
        &self,
        socket_id: &str,
        action: CombatAction,
    ) -> Option<PredictedCombatAction> {
        self.ledger.predict_combat_action(socket_id, action)
    }

    pub fn report_metrics(
        &self,
        socket_id: &str,
        measured: &MeasuredMetrics,
    ) -> Option<ClientNetworkMetrics> {
        self.ledger.update_network_metrics(socket_id, measured)
    }

    /// Record an authoritative snapshot stamped with the service clock
    pub fn confirm_state(&self, room_id: &str, state: GameState) -> Vec<Correction> {
        self.ledger
            .confirm_server_state(room_id, state, self.clock.now_ms())
    }

    pub fn confirm_combat(&self, room_id: &str, combat: CombatState) -> Vec<CombatCorrection> {
        self.ledger
            .confirm_combat_state(room_id, combat, self.clock.now_ms())
    }

    pub async fn system_metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            batching: self.batcher.system_metrics().await,
            prediction: self.ledger.system_metrics(),
        }
    }

    /// Close every room
    pub async fn shutdown(&self) {
        let rooms = self.batcher.room_count();
        self.batcher.close().await;
        for room_id in self.ledger.room_ids() {
            self.ledger.cleanup_room(&room_id);
        }
        for room_id in self.presence.rooms() {
            self.presence.remove_room(&room_id);
        }
        info!(rooms, "Sync service shut down");
    }
}
