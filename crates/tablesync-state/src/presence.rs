//! Lookups and outbound delivery provided by the surrounding server
//!
//! The sync core never reaches into a global player table or socket
//! registry; it is handed these capabilities at construction.

use crate::packet::BatchPacket;
use crate::SocketId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recipient role, which decides how a batch is shaped for the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Role {
    /// Game master: full, network-adapted batches
    GameMaster,
    /// Player: simplified batches (critical events, movement, chat)
    Player,
}

/// Which sockets are currently in a room
pub trait RoomDirectory: Send + Sync {
    fn sockets_in(&self, room_id: &str) -> Vec<SocketId>;
}

/// Role of a socket's player, if known
pub trait RoleResolver: Send + Sync {
    fn role(&self, socket_id: &str) -> Option<Role>;
}

/// Outbound `batch_update` delivery to one socket
pub trait BatchSink: Send + Sync {
    fn send_batch(&self, socket_id: &str, packet: &BatchPacket) -> Result<(), DeliveryError>;
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Socket {0} is not connected")]
    Disconnected(SocketId),

    #[error("Transport error: {0}")]
    Transport(String),
}
