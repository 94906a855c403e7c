//! Client prediction ledger
//!
//! State is sharded by room: each room owns its snapshot history and the
//! ledgers of the clients attached to it, behind one mutex. A socket index
//! maps clients to their room. The index lock is always released before a
//! shard is locked. Membership changes (joining, moving, leaving, dropping
//! a room) run under the room map's write lock so the index and the shards
//! never disagree.

use crate::combat::{
    find_combat_discrepancies, CombatCorrection, CombatPredictionMetrics, PredictedCombatAction,
    PredictionQuality,
};
use crate::config::LedgerConfig;
use crate::history::StateHistory;
use crate::prediction::predict;
use crate::reconcile::{calculate_state_discrepancy, Correction};
use crate::LedgerError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tablesync_state::{
    ClientInput, ClientNetworkMetrics, CombatAction, CombatState, GameState, InputAction,
    MeasuredMetrics, NetworkMetricsStore, PendingInput, RoomId, SharedClock, SocketId,
};
use uuid::Uuid;
use tracing::{debug, info};

/// Result of sequencing one input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedInput {
    pub input: PendingInput,
    /// `None` when prediction was skipped
    pub predicted_state: Option<GameState>,
    pub sequence: u64,
}

/// Read-side view of one client's prediction bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPredictionState {
    pub room_id: RoomId,
    pub last_input_sequence: u64,
    pub predicted_state: Option<GameState>,
    pub confirmed_state: Option<GameState>,
    pub last_server_update: u64,
    pub pending_inputs: Vec<PendingInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSystemMetrics {
    pub total_clients: usize,
    pub total_pending_inputs: usize,
    /// Rounded to whole milliseconds
    pub avg_latency: f64,
    /// Snapshots held across all rooms
    pub state_history_size: usize,
}

#[derive(Debug, Default)]
struct ClientLedger {
    last_input_sequence: u64,
    pending: VecDeque<PendingInput>,
    predicted_state: Option<GameState>,
    confirmed_state: Option<GameState>,
    last_server_update: u64,
}

#[derive(Debug, Default)]
struct RoomShard {
    history: StateHistory,
    clients: HashMap<SocketId, ClientLedger>,
    combat_corrections: u64,
}

type Shard = Arc<Mutex<RoomShard>>;

pub struct LagCompensator {
    config: LedgerConfig,
    metrics: NetworkMetricsStore,
    clock: SharedClock,
    rooms: RwLock<HashMap<RoomId, Shard>>,
    clients: RwLock<HashMap<SocketId, RoomId>>,
}

impl LagCompensator {
    pub fn new(config: LedgerConfig, metrics: NetworkMetricsStore, clock: SharedClock) -> Self {
        Self {
            config,
            metrics,
            clock,
            rooms: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Prediction window, correction tiers and history sizing
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Start tracking a client in a room. Returns false if it was already
    /// tracked there. A client tracked elsewhere is moved.
    pub fn initialize_client(&self, socket_id: &str, room_id: &str) -> bool {
        let total = {
            let mut rooms = self.rooms.write();
            let (previous, total) = {
                let mut clients = self.clients.write();
                let previous = clients.insert(socket_id.to_string(), room_id.to_string());
                (previous, clients.len())
            };
            if previous.as_deref() == Some(room_id) {
                return false;
            }
            if let Some(old_shard) = previous.and_then(|old| rooms.get(&old).cloned()) {
                old_shard.lock().clients.remove(socket_id);
            }
            let shard = rooms.entry(room_id.to_string()).or_default().clone();
            shard
                .lock()
                .clients
                .insert(socket_id.to_string(), ClientLedger::default());
            self.metrics.register(socket_id, self.clock.now_ms());
            total
        };

        if total % 5 == 0 {
            info!(total_clients = total, "Lag compensation tracking clients");
        } else {
            debug!(socket_id = %socket_id, room_id = %room_id, "Tracking client");
        }
        true
    }

    /// True when the client has a ledger in some room
    pub fn is_tracked(&self, socket_id: &str) -> bool {
        self.clients.read().contains_key(socket_id)
    }

    /// Rooms that currently hold history or clients
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.read().keys().cloned().collect()
    }

    /// Room the client is tracked in
    pub fn client_room(&self, socket_id: &str) -> Option<RoomId> {
        self.clients.read().get(socket_id).cloned()
    }

    /// Sequence and record an input, then predict its effect.
    /// Returns `None` for untracked clients.
    pub fn process_client_input(&self, socket_id: &str, input: ClientInput) -> Option<ProcessedInput> {
        match self.try_process_client_input(socket_id, input) {
            Ok(processed) => Some(processed),
            Err(e) => {
                debug!(socket_id = %socket_id, error = %e, "Input ignored");
                None
            }
        }
    }

    pub fn try_process_client_input(
        &self,
        socket_id: &str,
        input: ClientInput,
    ) -> Result<ProcessedInput, LedgerError> {
        let now = self.clock.now_ms();
        let shard = self.client_shard(socket_id)?;
        let mut shard = shard.lock();
        let RoomShard { history, clients, .. } = &mut *shard;
        let client = clients
            .get_mut(socket_id)
            .ok_or_else(|| LedgerError::ClientNotTracked(socket_id.to_string()))?;

        let pending = self.record_pending(client, socket_id, input.action, input.timestamp, now);

        let latency = self.latency(socket_id, now);
        let predicted_state = self.predict_for(client, history, &pending.input, latency, now);

        Ok(ProcessedInput {
            sequence: pending.sequence,
            input: pending,
            predicted_state,
        })
    }

    /// Sequence a combat action on the same counter as regular inputs and
    /// queue it for reconciliation. Returns `None` for untracked clients.
    pub fn predict_combat_action(
        &self,
        socket_id: &str,
        action: CombatAction,
    ) -> Option<PredictedCombatAction> {
        match self.try_predict_combat_action(socket_id, action) {
            Ok(predicted) => Some(predicted),
            Err(e) => {
                debug!(socket_id = %socket_id, error = %e, "Combat action ignored");
                None
            }
        }
    }

    pub fn try_predict_combat_action(
        &self,
        socket_id: &str,
        action: CombatAction,
    ) -> Result<PredictedCombatAction, LedgerError> {
        let now = self.clock.now_ms();
        let shard = self.client_shard(socket_id)?;
        let mut shard = shard.lock();
        let client = shard
            .clients
            .get_mut(socket_id)
            .ok_or_else(|| LedgerError::ClientNotTracked(socket_id.to_string()))?;

        let CombatAction {
            kind,
            data,
            client_time,
        } = action;
        let pending = self.record_pending(
            client,
            socket_id,
            InputAction::Combat {
                kind,
                data: data.clone(),
            },
            client_time,
            now,
        );

        Ok(PredictedCombatAction {
            id: Uuid::new_v4(),
            kind,
            sequence: pending.sequence,
            timestamp: now,
            predicted: true,
            data,
        })
    }

    /// Assign the next sequence number, queue the input, and drop queued
    /// inputs older than the prediction horizon.
    fn record_pending(
        &self,
        client: &mut ClientLedger,
        socket_id: &str,
        action: InputAction,
        client_timestamp: Option<u64>,
        now: u64,
    ) -> PendingInput {
        client.last_input_sequence += 1;
        let pending = PendingInput {
            sequence: client.last_input_sequence,
            input: action,
            client_timestamp: client_timestamp.unwrap_or(now),
            server_timestamp: now,
            socket_id: socket_id.to_string(),
        };
        client.pending.push_back(pending.clone());

        let cutoff = now as f64 - self.config.max_prediction_ms;
        client
            .pending
            .retain(|p| p.server_timestamp as f64 > cutoff);
        pending
    }

    /// Predict the effect of `action` for a client without recording it.
    /// `None` when latency is outside the prediction window or there is no
    /// base state yet.
    pub fn apply_client_prediction(&self, socket_id: &str, action: &InputAction) -> Option<GameState> {
        let now = self.clock.now_ms();
        let shard = self.client_shard(socket_id).ok()?;
        let mut shard = shard.lock();
        let RoomShard { history, clients, .. } = &mut *shard;
        let client = clients.get_mut(socket_id)?;

        let latency = self.latency(socket_id, now);
        self.predict_for(client, history, action, latency, now)
    }

    fn predict_for(
        &self,
        client: &mut ClientLedger,
        history: &StateHistory,
        action: &InputAction,
        latency: f64,
        now: u64,
    ) -> Option<GameState> {
        if !self.config.should_predict(latency) {
            return None;
        }
        let base = client
            .confirmed_state
            .as_ref()
            .or_else(|| history.latest().map(|s| &s.state))?;

        let predicted = predict(base, action, latency, now);
        client.predicted_state = Some(predicted.clone());
        Some(predicted)
    }

    /// Record an authoritative snapshot and reconcile every client in the
    /// room against it.
    pub fn confirm_server_state(
        &self,
        room_id: &str,
        state: GameState,
        timestamp: u64,
    ) -> Vec<Correction> {
        let shard = self.shard_or_create(room_id);
        let mut shard = shard.lock();
        shard
            .history
            .record(state.clone(), timestamp, self.config.history_window_ms());

        let mut corrections = Vec::new();
        for (socket_id, client) in shard.clients.iter_mut() {
            let latency = self.latency(socket_id, timestamp);
            if let Some(correction) =
                self.correct_client(socket_id, client, &state, timestamp, latency)
            {
                corrections.push(correction);
            }
        }

        if !corrections.is_empty() {
            debug!(room_id = %room_id, corrections = corrections.len(), "Issued corrections");
        }
        corrections
    }

    /// Reconcile a single client against `server_state`
    pub fn check_for_correction(
        &self,
        socket_id: &str,
        server_state: &GameState,
        timestamp: u64,
    ) -> Option<Correction> {
        let shard = self.client_shard(socket_id).ok()?;
        let mut shard = shard.lock();
        let client = shard.clients.get_mut(socket_id)?;
        let latency = self.latency(socket_id, timestamp);
        self.correct_client(socket_id, client, server_state, timestamp, latency)
    }

    fn correct_client(
        &self,
        socket_id: &str,
        client: &mut ClientLedger,
        server_state: &GameState,
        timestamp: u64,
        latency: f64,
    ) -> Option<Correction> {
        let predicted = client.predicted_state.as_ref()?;
        let discrepancy =
            calculate_state_discrepancy(predicted, server_state, self.config.ms_per_unit);
        let threshold = self.config.correction_threshold(latency);
        if discrepancy <= threshold {
            return None;
        }

        debug!(
            socket_id = %socket_id,
            discrepancy,
            threshold,
            "Correction needed"
        );

        client.confirmed_state = Some(server_state.clone());
        client.last_server_update = timestamp;
        client.predicted_state = None;

        let cutoff = timestamp as f64 - latency;
        client
            .pending
            .retain(|p| p.server_timestamp as f64 > cutoff);

        Some(Correction {
            socket_id: socket_id.to_string(),
            corrected_state: server_state.clone(),
            discrepancy,
            pending_inputs: client.pending.iter().cloned().collect(),
        })
    }

    /// Fold a measurement into the shared metrics store.
    /// Untracked sockets are ignored.
    pub fn update_network_metrics(
        &self,
        socket_id: &str,
        measured: &MeasuredMetrics,
    ) -> Option<ClientNetworkMetrics> {
        if !self.is_tracked(socket_id) {
            return None;
        }
        let updated = self
            .metrics
            .update(socket_id, measured, self.clock.now_ms())?;
        debug!(
            socket_id = %socket_id,
            latency = updated.latency.round(),
            fps = updated.update_rate.fps(),
            "Network metrics updated"
        );
        Some(updated)
    }

    /// Smoothed metrics for a client, tracked or not
    pub fn client_metrics(&self, socket_id: &str) -> Option<ClientNetworkMetrics> {
        self.metrics.get(socket_id)
    }

    /// Snapshot of a client's sequencing and prediction state
    pub fn client_state(&self, socket_id: &str) -> Option<ClientPredictionState> {
        let room_id = self.client_room(socket_id)?;
        let shard = self.shard(&room_id)?;
        let shard = shard.lock();
        let client = shard.clients.get(socket_id)?;
        Some(ClientPredictionState {
            room_id,
            last_input_sequence: client.last_input_sequence,
            predicted_state: client.predicted_state.clone(),
            confirmed_state: client.confirmed_state.clone(),
            last_server_update: client.last_server_update,
            pending_inputs: client.pending.iter().cloned().collect(),
        })
    }

    /// Record a combat update as a snapshot and report clients whose
    /// predicted combat state disagrees with it.
    pub fn confirm_combat_state(
        &self,
        room_id: &str,
        combat: CombatState,
        timestamp: u64,
    ) -> Vec<CombatCorrection> {
        let shard = self.shard_or_create(room_id);
        let mut shard = shard.lock();

        let corrections: Vec<_> = shard
            .clients
            .iter()
            .filter_map(|(socket_id, client)| {
                let predicted = client.predicted_state.as_ref()?.combat.as_ref()?;
                let discrepancies = find_combat_discrepancies(predicted, &combat);
                (!discrepancies.is_empty()).then(|| CombatCorrection {
                    socket_id: socket_id.clone(),
                    discrepancies,
                })
            })
            .collect();
        shard.combat_corrections += corrections.len() as u64;

        let mut state = shard
            .history
            .latest()
            .map(|s| s.state.clone())
            .unwrap_or_default();
        state.combat = Some(combat);
        shard
            .history
            .record(state, timestamp, self.config.history_window_ms());

        for correction in &corrections {
            debug!(
                room_id = %room_id,
                socket_id = %correction.socket_id,
                discrepancies = correction.discrepancies.len(),
                "Combat correction"
            );
        }
        corrections
    }

    /// `None` until the room holds at least two snapshots
    pub fn combat_prediction_metrics(&self, room_id: &str) -> Option<CombatPredictionMetrics> {
        let shard = self.shard(room_id)?;
        let shard = shard.lock();
        if shard.history.len() < 2 {
            return None;
        }
        let client_count = shard.clients.len();
        Some(CombatPredictionMetrics {
            room_id: room_id.to_string(),
            client_count,
            corrections_needed: shard.combat_corrections,
            prediction_quality: PredictionQuality::grade(shard.combat_corrections, client_count),
        })
    }

    /// Client, pending-input and history totals across every room
    pub fn system_metrics(&self) -> LedgerSystemMetrics {
        let sockets: Vec<SocketId> = self.clients.read().keys().cloned().collect();
        let shards: Vec<Shard> = self.rooms.read().values().cloned().collect();

        let mut metrics = LedgerSystemMetrics {
            total_clients: sockets.len(),
            ..LedgerSystemMetrics::default()
        };
        for shard in &shards {
            let shard = shard.lock();
            metrics.state_history_size += shard.history.len();
            metrics.total_pending_inputs += shard
                .clients
                .values()
                .map(|c| c.pending.len())
                .sum::<usize>();
        }

        let latencies: Vec<f64> = sockets
            .iter()
            .filter_map(|s| self.metrics.get(s))
            .map(|m| m.latency)
            .collect();
        if !latencies.is_empty() {
            metrics.avg_latency =
                (latencies.iter().sum::<f64>() / latencies.len() as f64).round();
        }
        metrics
    }

    /// Forget a client and its metrics. Returns false if it was not tracked.
    pub fn cleanup_client(&self, socket_id: &str) -> bool {
        let room_id = {
            let rooms = self.rooms.write();
            let Some(room_id) = self.clients.write().remove(socket_id) else {
                return false;
            };
            if let Some(shard) = rooms.get(&room_id) {
                shard.lock().clients.remove(socket_id);
            }
            self.metrics.remove(socket_id);
            room_id
        };
        debug!(socket_id = %socket_id, room_id = %room_id, "Lag compensation cleanup for client");
        true
    }

    /// Drop a room's history and every client attached to it.
    /// Returns the number of clients released.
    pub fn cleanup_room(&self, room_id: &str) -> usize {
        let sockets = {
            let mut rooms = self.rooms.write();
            let Some(shard) = rooms.remove(room_id) else {
                return 0;
            };
            let sockets: Vec<SocketId> = shard.lock().clients.drain().map(|(id, _)| id).collect();

            let mut clients = self.clients.write();
            for socket_id in &sockets {
                if clients.get(socket_id).map(String::as_str) == Some(room_id) {
                    clients.remove(socket_id);
                }
                self.metrics.remove(socket_id);
            }
            sockets
        };

        debug!(room_id = %room_id, clients = sockets.len(), "Lag compensation cleanup for room");
        sockets.len()
    }

    fn latency(&self, socket_id: &str, now: u64) -> f64 {
        self.metrics.get_or_default(socket_id, now).latency
    }

    fn shard(&self, room_id: &str) -> Option<Shard> {
        self.rooms.read().get(room_id).cloned()
    }

    fn shard_or_create(&self, room_id: &str) -> Shard {
        if let Some(shard) = self.shard(room_id) {
            return shard;
        }
        self.rooms
            .write()
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    fn client_shard(&self, socket_id: &str) -> Result<Shard, LedgerError> {
        self.client_room(socket_id)
            .and_then(|room_id| self.shard(&room_id))
            .ok_or_else(|| LedgerError::ClientNotTracked(socket_id.to_string()))
    }
}
