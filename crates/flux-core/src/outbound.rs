//! Server → client wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::envelope::{EventEnvelope, EventPayload};
use crate::ids::{ClientId, UserId, WorkspaceId};

/// Event name for routed domain events.
pub const WORK_ITEM_UPDATED: &str = "work-item:updated";
/// Event name for the join acknowledgement.
pub const CONNECTED: &str = "connected";

/// Client-facing projection of an envelope.
///
/// Provenance fields (`publisher`, `version`, `outbox_id`, ...) have no slot
/// here, so they can never reach a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItemUpdate {
    /// ID of the domain object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Sub-tenant scoping hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Target tenant.
    pub workspace_id: WorkspaceId,
    /// Domain action label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Kind of domain object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Change payload, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
    /// Producer timestamp, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Number>,
    /// Actor that caused the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_id: Option<String>,
}

impl WorkItemUpdate {
    /// Project the client-visible fields of an envelope routed to `workspace_id`.
    pub fn project(envelope: &EventEnvelope, workspace_id: WorkspaceId) -> Self {
        Self {
            entity_id: envelope.entity_id.clone(),
            project_id: envelope.project_id.clone(),
            workspace_id,
            event_type: envelope.event_type.clone(),
            entity_type: envelope.entity_type.clone(),
            payload: envelope.payload.clone(),
            timestamp: envelope.timestamp.clone(),
            initiator_id: envelope.initiator_id.clone(),
        }
    }
}

/// Join acknowledgement sent to a freshly accepted client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAck {
    /// The connection's ID.
    pub client_id: ClientId,
    /// Namespace tenant.
    pub workspace_id: WorkspaceId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Join time.
    pub timestamp: DateTime<Utc>,
}

/// A named event on the websocket: `{"event": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event body.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame from any serializable body.
    pub fn new(event: impl Into<String>, data: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// A named event sent by a client: `{"event": ..., "args": [...]}`.
///
/// The relay only logs these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Event name chosen by the client.
    pub event: String,
    /// Arbitrary arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::decode;
    use serde_json::json;

    #[test]
    fn projection_matches_routed_scenario() {
        let env = decode(&json!({
            "event_type": "updated",
            "entity_type": "issue",
            "entity_id": "E1",
            "workspace_id": "W1",
            "payload": {"data": {"title": "x"}}
        }))
        .unwrap();
        let update = WorkItemUpdate::project(&env, WorkspaceId::from_raw("W1"));
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "entity_id": "E1",
                "workspace_id": "W1",
                "event_type": "updated",
                "entity_type": "issue",
                "payload": {"data": {"title": "x"}}
            })
        );
    }

    #[test]
    fn projection_never_forwards_provenance() {
        let env = decode(&json!({
            "workspace_id": "W1",
            "publisher": "api",
            "publisher_instance": "api-1",
            "version": "2",
            "outbox_id": 9,
            "event_id": "evt-1",
            "source": "web",
            "initiator_type": "bot"
        }))
        .unwrap();
        let value = serde_json::to_value(WorkItemUpdate::project(&env, WorkspaceId::from_raw("W1"))).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["publisher", "publisher_instance", "version", "outbox_id", "event_id", "source", "initiator_type"] {
            assert!(!obj.contains_key(key), "{key} leaked");
        }
    }

    #[test]
    fn explicit_null_data_reaches_clients() {
        let env = decode(&json!({"workspace_id": "W1", "payload": {"data": null}})).unwrap();
        let update = WorkItemUpdate::project(&env, WorkspaceId::from_raw("W1"));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["payload"], json!({"data": null}));
    }

    #[test]
    fn timestamp_keeps_integer_form() {
        let env = decode(&json!({"workspace_id": "W1", "timestamp": 1_718_000_000_123_u64})).unwrap();
        let json = serde_json::to_string(&WorkItemUpdate::project(&env, WorkspaceId::from_raw("W1"))).unwrap();
        assert!(json.contains("\"timestamp\":1718000000123"), "got: {json}");
    }

    #[test]
    fn connected_ack_is_camel_case() {
        let ack = ConnectedAck {
            client_id: ClientId::from_raw("client_1"),
            workspace_id: WorkspaceId::from_raw("W1"),
            user_id: UserId::from_raw("U1"),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["clientId"], "client_1");
        assert_eq!(value["workspaceId"], "W1");
        assert_eq!(value["userId"], "U1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn frame_wraps_event_and_data() {
        let frame = Frame::new(CONNECTED, &json!({"a": 1})).unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "connected", "data": {"a": 1}})
        );
    }

    #[test]
    fn client_frame_args_default_to_empty() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(frame.event, "typing");
        assert!(frame.args.is_empty());
    }
}
