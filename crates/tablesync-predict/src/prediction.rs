//! Pure prediction transforms: base state + input -> predicted state

use tablesync_state::{
    CharacterRecord, GameState, InputAction, InventoryChange, InventoryItem, Vec2,
};

/// Apply one input to a copy of `base`.
///
/// `latency_ms` drives dead reckoning for moving tokens; `now_ms` tags
/// every predicted entry. Combat actions and unrecognized inputs return the
/// base unchanged.
pub fn predict(base: &GameState, action: &InputAction, latency_ms: f64, now_ms: u64) -> GameState {
    let mut state = base.clone();
    match action {
        InputAction::TokenMove {
            token_id,
            position,
            velocity,
        } => {
            if let Some(position) = position {
                predict_token_move(&mut state, token_id, *position, velocity.as_ref(), latency_ms, now_ms);
            }
        }
        InputAction::CharacterUpdate {
            character_id,
            updates,
        } => {
            let record = state
                .characters
                .entry(character_id.clone())
                .or_insert_with(CharacterRecord::default);
            record
                .fields
                .extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
            record.predicted_at = Some(now_ms);
        }
        InputAction::InventoryChange { player_id, change } => {
            predict_inventory_change(&mut state, player_id, change, now_ms);
        }
        InputAction::Combat { .. } | InputAction::Unrecognized => {}
    }
    state
}

fn predict_token_move(
    state: &mut GameState,
    token_id: &str,
    position: Vec2,
    velocity: Option<&Vec2>,
    latency_ms: f64,
    now_ms: u64,
) {
    let position = match velocity {
        Some(velocity) => position.advanced(velocity, latency_ms / 1000.0),
        None => position,
    };
    let token = state.tokens.entry(token_id.to_string()).or_default();
    token.position = Some(position);
    token.predicted_at = Some(now_ms);
}

fn predict_inventory_change(
    state: &mut GameState,
    player_id: &str,
    change: &InventoryChange,
    now_ms: u64,
) {
    let items = &mut state.inventories.entry(player_id.to_string()).or_default().items;
    match change {
        InventoryChange::AddItem { item } => {
            items.push(InventoryItem {
                predicted_at: Some(now_ms),
                ..item.clone()
            });
        }
        InventoryChange::RemoveItem { item_id } => {
            items.retain(|item| &item.id != item_id);
        }
        InventoryChange::MoveItem {
            item_id,
            new_position,
        } => {
            if let Some(item) = items.iter_mut().find(|item| &item.id == item_id) {
                item.position = Some(new_position.clone());
                item.predicted_at = Some(now_ms);
            }
        }
    }
}
