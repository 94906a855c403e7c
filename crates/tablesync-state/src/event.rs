//! Game-state mutation events emitted by the room authority

use crate::game::{CombatState, InventoryItem, Vec2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Delivery priority. Declaration order is the delivery order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank: critical=0 < high=1 < normal=2 < low=3
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Critical and high events go to the high-priority queue and survive
    /// latency adaptation.
    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

/// Inventory mutation, shared by events and client inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InventoryChange {
    AddItem { item: InventoryItem },
    RemoveItem { item_id: String },
    MoveItem { item_id: String, new_position: Value },
}

/// Typed event payload. Serialized with a `type` tag next to the event's
/// own fields, so `{"type":"token_moved","tokenId":..,"position":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    TokenMoved {
        token_id: String,
        position: Vec2,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        velocity: Option<Vec2>,
    },
    CharacterMoved {
        character_id: String,
        position: Vec2,
    },
    CharacterUpdated {
        character_id: String,
        updates: Map<String, Value>,
    },
    InventoryChanged {
        player_id: String,
        change: InventoryChange,
    },
    ChatMessage {
        sender: String,
        content: String,
    },
    CombatUpdated {
        combat: CombatState,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: Value,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::TokenMoved { .. } => "token_moved",
            EventPayload::CharacterMoved { .. } => "character_moved",
            EventPayload::CharacterUpdated { .. } => "character_updated",
            EventPayload::InventoryChanged { .. } => "inventory_changed",
            EventPayload::ChatMessage { .. } => "chat_message",
            EventPayload::CombatUpdated { .. } => "combat_updated",
            EventPayload::Custom { .. } => "custom",
        }
    }

    /// Event kinds a player client always needs (movement and chat)
    pub fn is_player_essential(&self) -> bool {
        matches!(
            self,
            EventPayload::TokenMoved { .. }
                | EventPayload::CharacterMoved { .. }
                | EventPayload::ChatMessage { .. }
        )
    }

    pub fn position_mut(&mut self) -> Option<&mut Vec2> {
        match self {
            EventPayload::TokenMoved { position, .. }
            | EventPayload::CharacterMoved { position, .. } => Some(position),
            _ => None,
        }
    }
}

/// An enqueued event. Immutable once handed to the batcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: u64,
    pub priority: Priority,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload, priority: Priority, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            priority,
            payload,
        }
    }
}
