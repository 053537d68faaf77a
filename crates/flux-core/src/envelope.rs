//! Inbound event envelope and its decoder.
//!
//! Every field is optional. A field that is present with the wrong JSON type
//! fails the whole decode; there is no coercion. `null` counts as absent,
//! except inside the opaque payload where an explicit `null` is kept so it
//! reaches clients as sent.
//! Unknown keys are ignored so producers can add fields without breaking
//! the relay.

use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::ids::WorkspaceId;

/// Opaque change payload carried by an envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// New state of the entity (any JSON). `Some(Value::Null)` when the
    /// producer sent an explicit `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Attributes before the change (any JSON).
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<Value>,
}

/// Decoded representation of one queue message.
///
/// Fields are public for reading; the relay never mutates a decoded
/// envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Domain action label, e.g. `"updated"`.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Kind of domain object, e.g. `"issue"`.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// ID of the domain object.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Tenant; absent means the event is not for live clients.
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Sub-tenant scoping hint.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Actor that caused the event.
    #[serde(default)]
    pub initiator_id: Option<String>,
    /// Kind of actor.
    #[serde(default)]
    pub initiator_type: Option<String>,
    /// Change payload.
    #[serde(default, deserialize_with = "object_payload")]
    pub payload: Option<EventPayload>,
    /// Producer timestamp, kept in its original numeric form.
    #[serde(default)]
    pub timestamp: Option<Number>,
    /// Producer name.
    #[serde(default)]
    pub publisher: Option<String>,
    /// Producer instance.
    #[serde(default)]
    pub publisher_instance: Option<String>,
    /// Envelope schema version.
    #[serde(default)]
    pub version: Option<String>,
    /// Origin system.
    #[serde(default)]
    pub source: Option<String>,
    /// Transactional outbox row.
    #[serde(default)]
    pub outbox_id: Option<Number>,
    /// Producer-assigned event ID.
    #[serde(default)]
    pub event_id: Option<String>,
}

impl EventEnvelope {
    /// The routing target, if any. Empty strings are not routable.
    pub fn workspace(&self) -> Option<WorkspaceId> {
        self.workspace_id
            .as_deref()
            .filter(|w| !w.is_empty())
            .map(WorkspaceId::from_raw)
    }
}

/// Why a raw message could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("{message}: {cause}")]
pub struct ParseError {
    /// Human-readable summary.
    pub message: String,
    /// Underlying schema violation.
    #[source]
    pub cause: serde_json::Error,
}

/// Decode a raw message body into an envelope.
///
/// Pure and total: never panics, never performs I/O.
pub fn decode(raw: &Value) -> Result<EventEnvelope, ParseError> {
    // Derived struct visitors also accept sequences; envelopes are objects only.
    let result = if raw.is_object() {
        EventEnvelope::deserialize(raw)
    } else {
        Err(de::Error::invalid_type(unexpected(raw), &"an event envelope object"))
    };
    result.map_err(|cause| ParseError {
        message: format!("invalid event envelope ({})", shape(raw)),
        cause,
    })
}

fn object_payload<'de, D>(deserializer: D) -> Result<Option<EventPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer)?
        .map(|fields| EventPayload::deserialize(Value::Object(fields)).map_err(de::Error::custom))
        .transpose()
}

// Only called for keys that exist, so absent stays `None` via `default`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Interpret raw queue bytes as JSON, falling back to a JSON string so the
/// decoder can report a typed error for non-JSON bodies.
pub fn parse_content(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn unexpected(raw: &Value) -> Unexpected<'_> {
    match raw {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

fn shape(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn decodes_full_envelope() {
        let raw = json!({
            "event_type": "updated",
            "entity_type": "issue",
            "entity_id": "E1",
            "workspace_id": "W1",
            "project_id": "P1",
            "initiator_id": "U9",
            "initiator_type": "user",
            "payload": {"data": {"title": "x"}, "previous_attributes": {"title": "y"}},
            "timestamp": 1_718_000_000_123_u64,
            "publisher": "api",
            "publisher_instance": "api-1",
            "version": "1",
            "source": "web",
            "outbox_id": 42,
            "event_id": "evt-1"
        });
        let env = decode(&raw).unwrap();
        assert_eq!(env.event_type.as_deref(), Some("updated"));
        assert_eq!(env.workspace(), Some(WorkspaceId::from_raw("W1")));
        assert_eq!(env.timestamp, Some(Number::from(1_718_000_000_123_u64)));
        assert_eq!(env.outbox_id, Some(Number::from(42)));
        let payload = env.payload.unwrap();
        assert_eq!(payload.data, Some(json!({"title": "x"})));
        assert_eq!(payload.previous_attributes, Some(json!({"title": "y"})));
    }

    #[test]
    fn empty_object_is_valid() {
        let env = decode(&json!({})).unwrap();
        assert_eq!(env, EventEnvelope::default());
        assert!(env.workspace().is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let env = decode(&json!({"workspace_id": "W1", "extra": [1, 2]})).unwrap();
        assert_eq!(env.workspace_id.as_deref(), Some("W1"));
    }

    #[test]
    fn null_fields_count_as_absent() {
        let env = decode(&json!({"workspace_id": null, "payload": null})).unwrap();
        assert!(env.workspace_id.is_none());
        assert!(env.payload.is_none());
    }

    #[test]
    fn wrong_field_type_fails() {
        let err = decode(&json!({"workspace_id": 7})).unwrap_err();
        assert!(err.message.contains("object"), "got: {}", err.message);
        assert!(err.to_string().contains("invalid type"), "got: {err}");
    }

    #[test]
    fn string_timestamp_fails() {
        assert!(decode(&json!({"timestamp": "yesterday"})).is_err());
    }

    #[test]
    fn non_object_payload_fails() {
        assert!(decode(&json!({"payload": "opaque"})).is_err());
        assert!(decode(&json!({"payload": []})).is_err());
    }

    #[test]
    fn empty_array_is_not_an_envelope() {
        let err = decode(&json!([])).unwrap_err();
        assert!(err.message.contains("array"), "got: {}", err.message);
        assert!(err.to_string().contains("invalid type"), "got: {err}");
    }

    #[test]
    fn nested_payload_data_is_opaque() {
        let env = decode(&json!({"payload": {"data": [1, "two", null]}})).unwrap();
        assert_eq!(env.payload.unwrap().data, Some(json!([1, "two", null])));
    }

    #[test]
    fn explicit_null_payload_data_is_kept() {
        let payload = decode(&json!({"payload": {"data": null}})).unwrap().payload.unwrap();
        assert_eq!(payload.data, Some(Value::Null));
        assert_eq!(payload.previous_attributes, None);
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"data": null}));
    }

    #[test]
    fn absent_payload_data_stays_absent() {
        let payload = decode(&json!({"payload": {}})).unwrap().payload.unwrap();
        assert_eq!(payload.data, None);
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({}));
    }

    #[test]
    fn non_object_inputs_fail_with_shape() {
        for (raw, shape) in [
            (json!("not-json-shaped"), "string"),
            (json!(12), "number"),
            (json!([1]), "array"),
            (json!(null), "null"),
            (json!(true), "boolean"),
        ] {
            let err = decode(&raw).unwrap_err();
            assert!(err.message.contains(shape), "{shape}: {}", err.message);
        }
    }

    #[test]
    fn parse_error_exposes_source() {
        let err = decode(&json!("nope")).unwrap_err();
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn empty_workspace_is_not_routable() {
        let env = decode(&json!({"workspace_id": ""})).unwrap();
        assert!(env.workspace().is_none());
    }

    #[test]
    fn parse_content_reads_json() {
        assert_eq!(parse_content(br#"{"a":1}"#), json!({"a": 1}));
    }

    #[test]
    fn parse_content_falls_back_to_string() {
        assert_eq!(parse_content(b"not-json-shaped"), json!("not-json-shaped"));
    }

    #[test]
    fn parse_content_handles_invalid_utf8() {
        let value = parse_content(&[0xff, 0xfe, b'a']);
        assert!(value.is_string());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(Value::from),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("workspace_id".to_string()),
                        Just("payload".to_string()),
                        Just("timestamp".to_string()),
                        Just("data".to_string()),
                        "[a-z_]{1,12}",
                    ],
                    inner,
                    0..8
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_is_total(raw in arb_json()) {
            // Either outcome is fine; reaching here means no panic.
            let _ = decode(&raw);
        }

        #[test]
        fn parse_content_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&parse_content(&bytes));
        }
    }
}
