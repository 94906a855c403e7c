//! Authoritative and predicted tabletop state
//!
//! The state is deliberately loose outside of the facets the sync layer
//! reasons about (token positions, character records, inventories, combat):
//! unknown attributes ride along in flattened JSON maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 2D vector used for both positions and velocities (grid units)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Vec2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Round both components to `decimals` places
    pub fn rounded(&self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self {
            x: (self.x * factor).round() / factor,
            y: (self.y * factor).round() / factor,
        }
    }

    /// `self + velocity * seconds`
    pub fn advanced(&self, velocity: &Vec2, seconds: f64) -> Self {
        Self {
            x: self.x + velocity.x * seconds,
            y: self.y + velocity.y * seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,

    /// Set when the entry was produced by client-side prediction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_at: Option<u64>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl TokenState {
    pub fn at(position: Vec2) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }
}

/// A character sheet record; updates are shallow-merged into `fields`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_at: Option<u64>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_at: Option<u64>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl InventoryItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub items: Vec<InventoryItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub token_id: String,
    pub initiative: i32,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Combatant {
    pub fn new(token_id: impl Into<String>, initiative: i32) -> Self {
        Self {
            token_id: token_id.into(),
            initiative,
            attributes: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    pub current_turn_index: usize,
    pub round: u32,
    #[serde(default)]
    pub turn_order: Vec<Combatant>,
}

/// Room state as seen by the authority (or as predicted for one client)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tokens: BTreeMap<String, TokenState>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub characters: BTreeMap<String, CharacterRecord>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inventories: BTreeMap<String, Inventory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combat: Option<CombatState>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper placing a token at `position`
    pub fn with_token(mut self, token_id: impl Into<String>, position: Vec2) -> Self {
        self.tokens.insert(token_id.into(), TokenState::at(position));
        self
    }

    pub fn token_position(&self, token_id: &str) -> Option<Vec2> {
        self.tokens.get(token_id).and_then(|t| t.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_rounding() {
        let v = Vec2::new(1.23456, -7.891011);
        assert_eq!(v.rounded(2), Vec2::new(1.23, -7.89));
    }

    #[test]
    fn test_vec2_distance() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn test_token_attributes_survive_roundtrip() {
        let json = serde_json::json!({
            "tokens": {
                "goblin": { "position": { "x": 1.0, "y": 2.0 }, "hp": 7 }
            }
        });
        let state: GameState = serde_json::from_value(json).unwrap();
        let goblin = &state.tokens["goblin"];
        assert_eq!(goblin.position, Some(Vec2::new(1.0, 2.0)));
        assert_eq!(goblin.attributes["hp"], 7);
    }
}
