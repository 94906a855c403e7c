//! Combat-state reconciliation

use serde::Serialize;
use serde_json::{json, Value};
use tablesync_state::{CombatActionKind, CombatState, RoomId, SocketId};
use uuid::Uuid;

/// A sequenced combat action the client may render before the server
/// confirms it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedCombatAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: CombatActionKind,
    pub sequence: u64,
    pub timestamp: u64,
    pub predicted: bool,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombatDiscrepancy {
    pub field: &'static str,
    pub predicted: Value,
    pub server: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatCorrection {
    pub socket_id: SocketId,
    pub discrepancies: Vec<CombatDiscrepancy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PredictionQuality {
    pub fn grade(corrections: u64, clients: usize) -> Self {
        let corrections = corrections as f64;
        let clients = clients as f64;
        if corrections == 0.0 {
            PredictionQuality::Excellent
        } else if corrections < clients * 0.1 {
            PredictionQuality::Good
        } else if corrections < clients * 0.3 {
            PredictionQuality::Fair
        } else {
            PredictionQuality::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatPredictionMetrics {
    pub room_id: RoomId,
    pub client_count: usize,
    pub corrections_needed: u64,
    pub prediction_quality: PredictionQuality,
}

/// Turn index, round and turn order (by token id and initiative only)
pub fn find_combat_discrepancies(
    predicted: &CombatState,
    server: &CombatState,
) -> Vec<CombatDiscrepancy> {
    let mut found = Vec::new();

    if predicted.current_turn_index != server.current_turn_index {
        found.push(CombatDiscrepancy {
            field: "currentTurnIndex",
            predicted: json!(predicted.current_turn_index),
            server: json!(server.current_turn_index),
        });
    }

    if predicted.round != server.round {
        found.push(CombatDiscrepancy {
            field: "round",
            predicted: json!(predicted.round),
            server: json!(server.round),
        });
    }

    let predicted_order = turn_order(predicted);
    let server_order = turn_order(server);
    if predicted_order != server_order {
        found.push(CombatDiscrepancy {
            field: "turnOrder",
            predicted: order_json(&predicted_order),
            server: order_json(&server_order),
        });
    }

    found
}

fn turn_order(combat: &CombatState) -> Vec<(&str, i32)> {
    combat
        .turn_order
        .iter()
        .map(|c| (c.token_id.as_str(), c.initiative))
        .collect()
}

fn order_json(order: &[(&str, i32)]) -> Value {
    order
        .iter()
        .map(|(id, initiative)| json!({ "id": id, "initiative": initiative }))
        .collect()
}
