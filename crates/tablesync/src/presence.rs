//! In-memory room membership and roles

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tablesync_state::{Role, RoleResolver, RoomDirectory, RoomId, SocketId};

#[derive(Debug, Clone)]
struct Member {
    room_id: RoomId,
    role: Role,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: RwLock<HashMap<RoomId, BTreeSet<SocketId>>>,
    members: RwLock<HashMap<SocketId, Member>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a socket in a room, leaving any previous room.
    /// Returns the room it left, if any.
    pub fn join(&self, room_id: &str, socket_id: &str, role: Role) -> Option<RoomId> {
        let previous = self.members.write().insert(
            socket_id.to_string(),
            Member {
                room_id: room_id.to_string(),
                role,
            },
        );

        let mut rooms = self.rooms.write();
        if let Some(previous) = &previous {
            if previous.room_id != room_id {
                remove_socket(&mut rooms, &previous.room_id, socket_id);
            }
        }
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(socket_id.to_string());

        previous
            .map(|m| m.room_id)
            .filter(|previous| previous != room_id)
    }

    /// Remove a socket. Returns the room it was in.
    pub fn leave(&self, socket_id: &str) -> Option<RoomId> {
        let member = self.members.write().remove(socket_id)?;
        remove_socket(&mut self.rooms.write(), &member.room_id, socket_id);
        Some(member.room_id)
    }

    /// Drop a room and everyone in it. Returns the removed sockets.
    pub fn remove_room(&self, room_id: &str) -> Vec<SocketId> {
        let sockets: Vec<SocketId> = self
            .rooms
            .write()
            .remove(room_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut members = self.members.write();
        for socket_id in &sockets {
            members.remove(socket_id);
        }
        sockets
    }

    pub fn room_of(&self, socket_id: &str) -> Option<RoomId> {
        self.members.read().get(socket_id).map(|m| m.room_id.clone())
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.read().keys().cloned().collect()
    }
}

fn remove_socket(rooms: &mut HashMap<RoomId, BTreeSet<SocketId>>, room_id: &str, socket_id: &str) {
    if let Some(set) = rooms.get_mut(room_id) {
        set.remove(socket_id);
        if set.is_empty() {
            rooms.remove(room_id);
        }
    }
}

impl RoomDirectory for PresenceRegistry {
    fn sockets_in(&self, room_id: &str) -> Vec<SocketId> {
        self.rooms
            .read()
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl RoleResolver for PresenceRegistry {
    fn role(&self, socket_id: &str) -> Option<Role> {
        self.members.read().get(socket_id).map(|m| m.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let presence = PresenceRegistry::new();
        assert_eq!(presence.join("r1", "a", Role::GameMaster), None);
        assert_eq!(presence.join("r1", "b", Role::Player), None);

        assert_eq!(presence.sockets_in("r1"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(presence.role("b"), Some(Role::Player));

        assert_eq!(presence.leave("a"), Some("r1".to_string()));
        assert_eq!(presence.sockets_in("r1"), vec!["b".to_string()]);
        assert_eq!(presence.role("a"), None);
        assert_eq!(presence.leave("a"), None);
    }

    #[test]
    fn test_join_moves_between_rooms() {
        let presence = PresenceRegistry::new();
        presence.join("r1", "a", Role::Player);
        assert_eq!(presence.join("r2", "a", Role::GameMaster), Some("r1".to_string()));
        assert!(presence.sockets_in("r1").is_empty());
        assert_eq!(presence.room_of("a"), Some("r2".to_string()));
        assert_eq!(presence.role("a"), Some(Role::GameMaster));
        assert_eq!(presence.rooms(), vec!["r2".to_string()]);
    }

    #[test]
    fn test_remove_room() {
        let presence = PresenceRegistry::new();
        presence.join("r1", "a", Role::Player);
        presence.join("r1", "b", Role::Player);
        presence.join("r2", "c", Role::Player);

        assert_eq!(presence.remove_room("r1"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(presence.room_of("a"), None);
        assert_eq!(presence.room_of("c"), Some("r2".to_string()));
    }
}
