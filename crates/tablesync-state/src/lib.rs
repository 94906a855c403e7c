//! Shared data model for tabletop state synchronization
//!
//! Events, authoritative game state, client inputs, batch packets and
//! per-connection network metrics. Both the batching layer and the
//! prediction layer speak in these types.

pub mod clock;
pub mod event;
pub mod game;
pub mod input;
pub mod metrics;
pub mod packet;
pub mod presence;

pub use clock::{Clock, SharedClock, SystemClock};
pub use event::{Event, EventPayload, InventoryChange, Priority};
pub use game::{
    CharacterRecord, CombatState, Combatant, GameState, Inventory, InventoryItem, TokenState, Vec2,
};
pub use input::{ClientInput, CombatAction, CombatActionKind, InputAction, PendingInput};
pub use metrics::{ClientNetworkMetrics, MeasuredMetrics, NetworkMetricsStore, UpdateTier};
pub use packet::{BatchEvent, BatchMetadata, BatchPacket, Fingerprint, Pattern};
pub use presence::{BatchSink, DeliveryError, Role, RoleResolver, RoomDirectory};

use thiserror::Error;

/// Identifier of a game room (the unit of sharding)
pub type RoomId = String;

/// Identifier of a connected client socket
pub type SocketId = String;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
