//! Room membership: the delivery side of fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use flux_core::ClientId;

use crate::connection::ClientConnection;

/// Named rooms of live connections. Empty rooms are dropped.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: DashMap<String, HashMap<ClientId, Arc<ClientConnection>>>,
}

impl RoomTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if needed.
    pub fn join(&self, room: &str, connection: Arc<ClientConnection>) {
        let _ = self
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection from a room. Returns the room's remaining size.
    pub fn leave(&self, room: &str, client_id: &ClientId) -> usize {
        let remaining = match self.rooms.get_mut(room) {
            Some(mut members) => {
                let _ = members.remove(client_id);
                members.len()
            }
            None => return 0,
        };
        if remaining == 0 {
            let _ = self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        remaining
    }

    /// Snapshot of a room's members.
    pub fn members(&self, room: &str) -> Vec<Arc<ClientConnection>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members in a room.
    pub fn size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
