//! Inbound client inputs and their pending (sequenced) form

use crate::event::InventoryChange;
use crate::game::Vec2;
use crate::SocketId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the client asked for. Unknown input kinds deserialize to
/// `Unrecognized` and are still sequenced, just never predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum InputAction {
    TokenMove {
        token_id: String,
        #[serde(default)]
        position: Option<Vec2>,
        #[serde(default)]
        velocity: Option<Vec2>,
    },
    CharacterUpdate {
        character_id: String,
        #[serde(default)]
        updates: Map<String, Value>,
    },
    InventoryChange {
        player_id: String,
        change: InventoryChange,
    },
    /// Shown to the client ahead of the server's combat update; never
    /// changes the predicted board.
    Combat {
        kind: CombatActionKind,
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatActionKind {
    Attack,
    CastSpell,
    UseItem,
    Move,
    EndTurn,
    #[serde(other)]
    Other,
}

/// A combat action as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatAction {
    #[serde(rename = "type")]
    pub kind: CombatActionKind,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub client_time: Option<u64>,
}

impl CombatAction {
    pub fn new(kind: CombatActionKind, data: Value) -> Self {
        Self {
            kind,
            data,
            client_time: None,
        }
    }
}

/// Raw input as received from a socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInput {
    pub action: InputAction,

    /// Client-side timestamp, if the client sent one
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl ClientInput {
    pub fn new(action: InputAction) -> Self {
        Self {
            action,
            timestamp: None,
        }
    }

    pub fn at(mut self, client_timestamp: u64) -> Self {
        self.timestamp = Some(client_timestamp);
        self
    }
}

/// An input after the server sequenced and stamped it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInput {
    pub sequence: u64,
    pub input: InputAction,
    pub client_timestamp: u64,
    pub server_timestamp: u64,
    pub socket_id: SocketId,
}
