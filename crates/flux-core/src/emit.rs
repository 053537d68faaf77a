//! Fan-out contract between the relay and the transport.

use async_trait::async_trait;
use serde_json::Value;

use crate::ids::{UserId, WorkspaceId};

/// Delivers named events to rooms of live connections.
///
/// Implementations never fail the caller: an empty room is a successful
/// broadcast, and per-connection delivery problems stay inside the
/// transport. The return value is the number of connections the event was
/// handed to.
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Send to every connection in the workspace room.
    async fn emit_to_workspace(&self, workspace_id: &WorkspaceId, event: &str, payload: Value) -> usize;

    /// Send to every connection of one user.
    async fn emit_to_user(&self, user_id: &UserId, event: &str, payload: Value) -> usize;
}

/// Room name for a workspace.
pub fn workspace_room(workspace_id: &WorkspaceId) -> String {
    format!("workspace:{workspace_id}")
}

/// Room name for a user.
pub fn user_room(user_id: &UserId) -> String {
    format!("user:{user_id}")
}
