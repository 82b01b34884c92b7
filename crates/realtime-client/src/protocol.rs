//! Wire codec for the Phoenix Channels v1 envelope used by the realtime
//! protocol: join/leave/heartbeat builders and inbound frame decoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Protocol version sent in the websocket URL query string.
pub const PROTOCOL_VSN: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Change Filters
// ---------------------------------------------------------------------------

/// Row-level change kinds a subscription can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

/// One `(event, schema, table)` entry in a join payload's
/// `postgres_changes` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub event: ChangeEvent,
    pub schema: String,
    pub table: String,
}

impl ChangeFilter {
    /// Wildcard filter matching every change on a table.
    pub fn all(schema: &str, table: &str) -> Self {
        Self {
            event: ChangeEvent::All,
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Channel topic for a table's change feed.
pub fn channel_topic(schema: &str, table: &str) -> String {
    format!("realtime:{schema}:{table}")
}

/// Build a `phx_join` envelope subscribing to postgres changes on a topic.
pub fn join_envelope(topic: &str, filters: &[ChangeFilter], msg_ref: String) -> Envelope {
    Envelope {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: serde_json::json!({
            "config": {
                "postgres_changes": filters,
            }
        }),
        msg_ref: Some(msg_ref),
    }
}

/// Build a `phx_leave` envelope for a previously joined topic.
pub fn leave_envelope(topic: &str, msg_ref: String) -> Envelope {
    Envelope {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: serde_json::json!({}),
        msg_ref: Some(msg_ref),
    }
}

/// Build a keepalive envelope on the reserved `phoenix` topic.
pub fn heartbeat_envelope(msg_ref: String) -> Envelope {
    Envelope {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: serde_json::json!({}),
        msg_ref: Some(msg_ref),
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Decode one inbound text frame as a JSON object.
///
/// No schema beyond "is a JSON object" is enforced here; events pass through
/// to handlers untyped.
pub fn parse_inbound(text: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}
