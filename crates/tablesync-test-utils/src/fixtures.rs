use serde_json::{Map, Value};
use tablesync_state::{
    ClientInput, Event, EventPayload, GameState, InputAction, InventoryItem, Priority, Vec2,
};

pub fn token_moved(token_id: &str, x: f64, y: f64) -> EventPayload {
    EventPayload::TokenMoved {
        token_id: token_id.to_string(),
        position: Vec2::new(x, y),
        velocity: None,
    }
}

pub fn chat(sender: &str, content: &str) -> EventPayload {
    EventPayload::ChatMessage {
        sender: sender.to_string(),
        content: content.to_string(),
    }
}

pub fn custom(name: &str) -> EventPayload {
    EventPayload::Custom {
        name: name.to_string(),
        data: Value::Null,
    }
}

pub fn event(priority: Priority, timestamp: u64, payload: EventPayload) -> Event {
    Event::new(payload, priority, timestamp)
}

pub fn token_move_input(token_id: &str, position: Vec2, velocity: Option<Vec2>) -> ClientInput {
    ClientInput::new(InputAction::TokenMove {
        token_id: token_id.to_string(),
        position: Some(position),
        velocity,
    })
}

pub fn character_update_input(character_id: &str, updates: Value) -> ClientInput {
    let updates = match updates {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ClientInput::new(InputAction::CharacterUpdate {
        character_id: character_id.to_string(),
        updates,
    })
}

/// A small board: two tokens and one player inventory
pub fn board() -> GameState {
    let mut state = GameState::new()
        .with_token("goblin", Vec2::new(0.0, 0.0))
        .with_token("hero", Vec2::new(5.0, 5.0));
    state
        .inventories
        .entry("player-1".to_string())
        .or_default()
        .items
        .extend([InventoryItem::new("sword"), InventoryItem::new("potion")]);
    state
}
