use pretty_assertions::assert_eq;
use std::sync::Arc;
use tablesync_predict::{LagCompensator, LedgerConfig, LedgerError, PredictionQuality};
use tablesync_state::{
    ClientInput, ClientNetworkMetrics, CombatAction, CombatActionKind, CombatState, Combatant,
    GameState, InputAction, MeasuredMetrics, NetworkMetricsStore, UpdateTier, Vec2,
};
use serde_json::json;
use tablesync_test_utils::fixtures::{board, character_update_input, token_move_input};
use tablesync_test_utils::{init_test_logging, ManualClock, NetworkConditions};

const START: u64 = 10_000;

struct Harness {
    ledger: LagCompensator,
    clock: Arc<ManualClock>,
    store: NetworkMetricsStore,
}

fn harness() -> Harness {
    init_test_logging();
    let clock = ManualClock::new(START);
    let store = NetworkMetricsStore::new();
    let ledger = LagCompensator::new(LedgerConfig::default(), store.clone(), clock.shared());
    Harness {
        ledger,
        clock,
        store,
    }
}

impl Harness {
    fn set_latency(&self, socket_id: &str, latency: f64) {
        let mut metrics = ClientNetworkMetrics::initial(START);
        metrics.latency = latency;
        self.store.set(socket_id, metrics);
    }

    fn join_with_board(&self, socket_id: &str) {
        self.ledger.initialize_client(socket_id, "r1");
        self.ledger.confirm_server_state("r1", board(), START);
    }
}

fn move_goblin(x: f64) -> InputAction {
    token_move_input("goblin", Vec2::new(x, 0.0), None).action
}

#[test]
fn prediction_respects_latency_window() {
    let h = harness();
    h.join_with_board("c1");

    for (latency, expect) in [(9.0, false), (10.0, true), (200.0, true), (201.0, false)] {
        h.set_latency("c1", latency);
        let predicted = h.ledger.apply_client_prediction("c1", &move_goblin(1.0));
        assert_eq!(predicted.is_some(), expect, "latency {latency}");
    }
}

#[test]
fn prediction_needs_a_base_state() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    assert!(h.ledger.apply_client_prediction("c1", &move_goblin(1.0)).is_none());

    let processed = h.ledger.process_client_input("c1", ClientInput::new(move_goblin(1.0)));
    let processed = processed.expect("tracked client");
    assert!(processed.predicted_state.is_none());
    assert_eq!(processed.input.sequence, 1);
}

#[test]
fn correction_threshold_is_strict() {
    let h = harness();
    h.join_with_board("c1");
    h.set_latency("c1", 30.0);

    h.ledger.apply_client_prediction("c1", &move_goblin(4.9));
    let corrections = h.ledger.confirm_server_state("r1", board(), START + 10);
    assert!(corrections.is_empty());
    assert!(h.ledger.client_state("c1").unwrap().predicted_state.is_some());

    h.ledger.apply_client_prediction("c1", &move_goblin(5.1));
    let corrections = h.ledger.confirm_server_state("r1", board(), START + 20);
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].socket_id, "c1");
    assert!((corrections[0].discrepancy - 51.0).abs() < 1e-9);
    assert_eq!(corrections[0].corrected_state, board());

    let state = h.ledger.client_state("c1").unwrap();
    assert_eq!(state.confirmed_state, Some(board()));
    assert!(state.predicted_state.is_none());
    assert_eq!(state.last_server_update, START + 20);
}

#[test]
fn correction_keeps_only_inputs_after_latency_window() {
    let h = harness();
    h.join_with_board("c1");
    h.set_latency("c1", 30.0);

    h.ledger.process_client_input("c1", ClientInput::new(move_goblin(1.0)));
    h.clock.set(START + 50);
    h.ledger.process_client_input("c1", ClientInput::new(move_goblin(2.0)));
    h.clock.set(START + 100);
    let last = h
        .ledger
        .process_client_input("c1", ClientInput::new(move_goblin(20.0)).at(START + 95))
        .unwrap();
    assert_eq!(last.sequence, 3);
    assert_eq!(last.input.client_timestamp, START + 95);
    assert_eq!(last.input.server_timestamp, START + 100);

    let corrections = h.ledger.confirm_server_state("r1", board(), START + 90);
    assert_eq!(corrections.len(), 1);
    let retained: Vec<_> = corrections[0]
        .pending_inputs
        .iter()
        .map(|p| p.sequence)
        .collect();
    assert_eq!(retained, vec![3]);
}

#[test]
fn pending_inputs_are_time_bounded() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");

    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));
    h.clock.set(START + 150);
    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));
    h.clock.set(START + 250);
    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));

    let pending: Vec<_> = h
        .ledger
        .client_state("c1")
        .unwrap()
        .pending_inputs
        .iter()
        .map(|p| p.sequence)
        .collect();
    assert_eq!(pending, vec![2, 3]);
}

#[test]
fn dead_reckoning_uses_smoothed_latency() {
    let h = harness();
    h.join_with_board("c1");
    h.set_latency("c1", 100.0);

    let input = token_move_input("hero", Vec2::new(0.0, 0.0), Some(Vec2::new(10.0, 0.0)));
    let processed = h.ledger.process_client_input("c1", input).unwrap();
    let predicted = processed.predicted_state.unwrap();
    assert_eq!(predicted.token_position("hero"), Some(Vec2::new(1.0, 0.0)));
    assert_eq!(predicted.tokens["hero"].predicted_at, Some(START));
}

#[test]
fn untracked_clients_are_rejected() {
    let h = harness();
    assert!(h
        .ledger
        .process_client_input("ghost", ClientInput::new(InputAction::Unrecognized))
        .is_none());
    assert_eq!(
        h.ledger
            .try_process_client_input("ghost", ClientInput::new(InputAction::Unrecognized)),
        Err(LedgerError::ClientNotTracked("ghost".to_string()))
    );
    assert!(h
        .ledger
        .update_network_metrics("ghost", &MeasuredMetrics::new(100.0, 5.0, 0.0))
        .is_none());
}

#[test]
fn metrics_are_smoothed() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    let updated = h
        .ledger
        .update_network_metrics("c1", &MeasuredMetrics::new(100.0, 5.0, 0.0))
        .unwrap();
    assert_eq!(updated.latency, 65.0);
    assert_eq!(h.ledger.client_metrics("c1"), Some(updated));
}

#[test]
fn poor_network_degrades_tier_and_stops_prediction() {
    let h = harness();
    h.join_with_board("c1");
    let poor = NetworkConditions::poor().measurement();

    for _ in 0..10 {
        h.ledger.update_network_metrics("c1", &poor);
    }
    let metrics = h.ledger.client_metrics("c1").unwrap();
    assert_eq!(metrics.update_rate, UpdateTier::Poor);
    assert!(metrics.latency > 200.0);
    assert!(h.ledger.apply_client_prediction("c1", &move_goblin(1.0)).is_none());

    for _ in 0..20 {
        h.ledger
            .update_network_metrics("c1", &NetworkConditions::lan().measurement());
    }
    assert!(h.ledger.client_metrics("c1").unwrap().latency < 10.0);
    assert!(h.ledger.apply_client_prediction("c1", &move_goblin(1.0)).is_none());

    h.ledger
        .update_network_metrics("c1", &NetworkConditions::broadband().measurement());
    assert!(h.ledger.apply_client_prediction("c1", &move_goblin(1.0)).is_some());
}

#[test]
fn character_updates_merge_into_prediction() {
    let h = harness();
    h.join_with_board("c1");

    let first = h
        .ledger
        .process_client_input("c1", character_update_input("hero", json!({"hp": 12, "ac": 15})))
        .unwrap();
    assert_eq!(first.predicted_state.unwrap().characters["hero"].fields["hp"], json!(12));

    // Prediction always starts from the confirmed base, not the previous guess
    let second = h
        .ledger
        .process_client_input("c1", character_update_input("hero", json!({"hp": 9})))
        .unwrap();
    let hero = &second.predicted_state.unwrap().characters["hero"];
    assert_eq!(hero.fields["hp"], json!(9));
    assert!(!hero.fields.contains_key("ac"));
    assert_eq!(hero.predicted_at, Some(START));
}

#[test]
fn initialize_is_idempotent_and_moves_rooms() {
    let h = harness();
    assert!(h.ledger.initialize_client("c1", "r1"));
    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));
    assert!(!h.ledger.initialize_client("c1", "r1"));
    assert_eq!(h.ledger.client_state("c1").unwrap().last_input_sequence, 1);

    assert!(h.ledger.initialize_client("c1", "r2"));
    let state = h.ledger.client_state("c1").unwrap();
    assert_eq!(state.room_id, "r2");
    assert_eq!(state.last_input_sequence, 0);
}

#[test]
fn room_cleanup_cascades_to_clients() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    h.ledger.initialize_client("c2", "r1");
    h.ledger.initialize_client("c3", "r2");
    h.ledger.confirm_server_state("r1", GameState::new(), START);

    assert_eq!(h.ledger.cleanup_room("r1"), 2);
    assert!(!h.ledger.is_tracked("c1"));
    assert!(h.store.get("c2").is_none());
    assert!(h.ledger.is_tracked("c3"));
    assert_eq!(h.ledger.cleanup_room("r1"), 0);

    assert!(h.ledger.cleanup_client("c3"));
    assert!(!h.ledger.cleanup_client("c3"));
    assert!(h.store.is_empty());
}

#[test]
fn rejoining_after_room_cleanup_tracks_client_again() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    h.ledger.cleanup_room("r1");

    assert!(h.ledger.initialize_client("c1", "r1"));
    let state = h.ledger.client_state("c1").expect("ledger exists in the room");
    assert_eq!(state.room_id, "r1");
    assert!(h.store.get("c1").is_some());
    assert!(h
        .ledger
        .process_client_input("c1", ClientInput::new(InputAction::Unrecognized))
        .is_some());
}

#[test]
fn concurrent_join_and_room_cleanup_never_orphan_a_client() {
    let h = harness();
    for round in 0..200 {
        let socket_id = format!("c{round}");
        std::thread::scope(|scope| {
            scope.spawn(|| h.ledger.initialize_client(&socket_id, "r1"));
            scope.spawn(|| h.ledger.cleanup_room("r1"));
        });

        // Tracked means reachable; untracked means fully released
        if h.ledger.is_tracked(&socket_id) {
            assert!(h.ledger.client_state(&socket_id).is_some(), "{socket_id} orphaned");
            assert!(h.store.get(&socket_id).is_some());
        } else {
            assert!(h.ledger.client_state(&socket_id).is_none());
            assert!(h.store.get(&socket_id).is_none());
        }
        h.ledger.cleanup_room("r1");
    }
}

#[test]
fn combat_actions_share_the_input_sequence() {
    let h = harness();
    h.join_with_board("c1");

    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));
    let mut attack = CombatAction::new(CombatActionKind::Attack, json!({ "target": "goblin" }));
    attack.client_time = Some(START - 40);
    let predicted = h.ledger.predict_combat_action("c1", attack).unwrap();
    let processed = h
        .ledger
        .process_client_input("c1", token_move_input("hero", Vec2::new(6.0, 5.0), None))
        .unwrap();

    assert_eq!(predicted.sequence, 2);
    assert!(predicted.predicted);
    assert_eq!(predicted.kind, CombatActionKind::Attack);
    assert_eq!(predicted.timestamp, START);
    assert_eq!(predicted.data, json!({ "target": "goblin" }));
    assert_eq!(processed.sequence, 3);

    let state = h.ledger.client_state("c1").unwrap();
    assert_eq!(state.last_input_sequence, 3);
    let queued = &state.pending_inputs[1];
    assert_eq!(queued.client_timestamp, START - 40);
    assert_eq!(
        queued.input,
        InputAction::Combat {
            kind: CombatActionKind::Attack,
            data: json!({ "target": "goblin" }),
        }
    );
    // The combat action itself does not move anything on the board
    assert_eq!(
        processed.predicted_state.unwrap().token_position("hero"),
        Some(Vec2::new(6.0, 5.0))
    );
}

#[test]
fn combat_actions_age_out_with_other_inputs() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");

    h.ledger
        .predict_combat_action("c1", CombatAction::new(CombatActionKind::EndTurn, json!(null)))
        .unwrap();
    h.clock.set(START + 250);
    h.ledger
        .predict_combat_action("c1", CombatAction::new(CombatActionKind::CastSpell, json!({})))
        .unwrap();

    let pending = h.ledger.client_state("c1").unwrap().pending_inputs;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sequence, 2);

    assert!(h
        .ledger
        .predict_combat_action("ghost", CombatAction::new(CombatActionKind::Attack, json!(null)))
        .is_none());
    assert_eq!(
        h.ledger
            .try_predict_combat_action("ghost", CombatAction::new(CombatActionKind::Move, json!(null))),
        Err(LedgerError::ClientNotTracked("ghost".to_string()))
    );
}

#[test]
fn system_metrics_summarize_ledger() {
    let h = harness();
    h.join_with_board("c1");
    h.ledger.initialize_client("c2", "r1");
    h.set_latency("c2", 31.0);
    h.ledger.process_client_input("c1", ClientInput::new(InputAction::Unrecognized));
    h.ledger.confirm_server_state("r2", GameState::new(), START);

    let metrics = h.ledger.system_metrics();
    assert_eq!(metrics.total_clients, 2);
    assert_eq!(metrics.total_pending_inputs, 1);
    assert_eq!(metrics.avg_latency, 41.0);
    assert_eq!(metrics.state_history_size, 2);
}

fn combat(round: u32) -> CombatState {
    CombatState {
        current_turn_index: 0,
        round,
        turn_order: vec![Combatant::new("goblin", 14), Combatant::new("hero", 11)],
    }
}

#[test]
fn combat_reconciliation() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    h.ledger.initialize_client("c2", "r1");

    let mut state = board();
    state.combat = Some(combat(1));
    h.ledger.confirm_server_state("r1", state, START);
    assert!(h.ledger.combat_prediction_metrics("r1").is_none());

    h.ledger
        .apply_client_prediction("c1", &InputAction::Unrecognized)
        .expect("default latency predicts");

    let corrections = h.ledger.confirm_combat_state("r1", combat(2), START + 100);
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].socket_id, "c1");
    let fields: Vec<_> = corrections[0].discrepancies.iter().map(|d| d.field).collect();
    assert_eq!(fields, vec!["round"]);

    let metrics = h.ledger.combat_prediction_metrics("r1").unwrap();
    assert_eq!(metrics.client_count, 2);
    assert_eq!(metrics.corrections_needed, 1);
    assert_eq!(metrics.prediction_quality, PredictionQuality::Poor);
}

#[test]
fn combat_snapshot_keeps_latest_board() {
    let h = harness();
    h.ledger.initialize_client("c1", "r1");
    h.ledger.confirm_server_state("r1", board(), START);
    h.ledger.confirm_combat_state("r1", combat(1), START + 10);

    // The combat snapshot becomes the prediction base
    let predicted = h
        .ledger
        .apply_client_prediction("c1", &InputAction::Unrecognized)
        .unwrap();
    assert_eq!(predicted.combat, Some(combat(1)));
    assert_eq!(predicted.token_position("hero"), Some(Vec2::new(5.0, 5.0)));
}
