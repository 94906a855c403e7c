use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tablesync_state::{
    BatchPacket, BatchSink, DeliveryError, Role, RoleResolver, RoomDirectory, SocketId,
};

/// Fixed room membership and roles, editable from the test
#[derive(Debug, Default)]
pub struct StaticPresence {
    rooms: Mutex<HashMap<String, Vec<SocketId>>>,
    roles: Mutex<HashMap<SocketId, Role>>,
}

impl StaticPresence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, room_id: &str, socket_id: &str, role: Option<Role>) {
        self.rooms
            .lock()
            .entry(room_id.to_string())
            .or_default()
            .push(socket_id.to_string());
        if let Some(role) = role {
            self.roles.lock().insert(socket_id.to_string(), role);
        }
    }
}

impl RoomDirectory for StaticPresence {
    fn sockets_in(&self, room_id: &str) -> Vec<SocketId> {
        self.rooms.lock().get(room_id).cloned().unwrap_or_default()
    }
}

impl RoleResolver for StaticPresence {
    fn role(&self, socket_id: &str) -> Option<Role> {
        self.roles.lock().get(socket_id).copied()
    }
}

/// Captures every delivered packet; selected sockets can be made to fail
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(SocketId, BatchPacket)>>,
    failing: Mutex<HashSet<SocketId>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_socket(&self, socket_id: &str) {
        self.failing.lock().insert(socket_id.to_string());
    }

    pub fn sent(&self) -> Vec<(SocketId, BatchPacket)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, socket_id: &str) -> Vec<BatchPacket> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == socket_id)
            .map(|(_, packet)| packet.clone())
            .collect()
    }

    pub fn delivery_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl BatchSink for RecordingSink {
    fn send_batch(&self, socket_id: &str, packet: &BatchPacket) -> Result<(), DeliveryError> {
        if self.failing.lock().contains(socket_id) {
            return Err(DeliveryError::Disconnected(socket_id.to_string()));
        }
        self.sent
            .lock()
            .push((socket_id.to_string(), packet.clone()));
        Ok(())
    }
}
