//! Fan-out of named events to rooms.

use std::sync::Arc;

use async_trait::async_trait;
use flux_core::emit::{user_room, workspace_room};
use flux_core::{Emitter, Frame, UserId, WorkspaceId};
use flux_telemetry::metrics::{RELAY_EMIT_RECIPIENTS, RELAY_EMITS_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::rooms::RoomTable;

/// Delivers frames to every member of a room.
///
/// At-most-once: a client that is not connected at emit time, or whose
/// send queue is full, does not get the frame. A client that keeps
/// dropping frames past `max_dropped_frames` is disconnected.
#[derive(Clone, Debug)]
pub struct RoomEmitter {
    rooms: Arc<RoomTable>,
    max_dropped_frames: u64,
}

impl RoomEmitter {
    /// Create an emitter over `rooms`.
    pub fn new(rooms: Arc<RoomTable>, max_dropped_frames: u64) -> Self {
        Self {
            rooms,
            max_dropped_frames,
        }
    }

    /// Send `{"event": event, "data": payload}` to every member of `room`.
    /// Returns how many connections accepted the frame.
    pub fn emit_to_room(&self, room: &str, event: &str, payload: Value) -> usize {
        let frame = Frame {
            event: event.to_owned(),
            data: payload,
        };
        let text: Arc<str> = match serde_json::to_string(&frame) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(room, event, error = %e, "failed to serialize frame");
                return 0;
            }
        };

        let members = self.rooms.members(room);
        let mut delivered = 0;
        for conn in &members {
            if conn.send(text.clone()) {
                delivered += 1;
                continue;
            }
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            let drops = conn.drop_count();
            warn!(client_id = %conn.id, room, event, drops, "client send queue full, frame dropped");
            if drops > self.max_dropped_frames && !conn.is_closed() {
                warn!(client_id = %conn.id, drops, "disconnecting slow client");
                conn.close();
            }
        }

        counter!(RELAY_EMITS_TOTAL, "event" => event.to_owned()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!(RELAY_EMIT_RECIPIENTS).record(delivered as f64);
        debug!(room, event, recipients = members.len(), delivered, "emitted");
        delivered
    }
}

#[async_trait]
impl Emitter for RoomEmitter {
    async fn emit_to_workspace(&self, workspace_id: &WorkspaceId, event: &str, payload: Value) -> usize {
        self.emit_to_room(&workspace_room(workspace_id), event, payload)
    }

    async fn emit_to_user(&self, user_id: &UserId, event: &str, payload: Value) -> usize {
        self.emit_to_room(&user_room(user_id), event, payload)
    }
}
