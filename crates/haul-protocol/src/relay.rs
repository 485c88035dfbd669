//! Envelopes relayed over the debugger channel.
//!
//! The relay only looks at `type` and the routing field `client`; every
//! other field is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message travelling between the debugger and a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message payload.
    #[serde(default)]
    pub payload: Value,
    /// Routing tag: the client a message came from or is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Any additional fields sent by the peer.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RelayEnvelope {
    /// Create an envelope without a routing tag.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            client: None,
            extra: Map::new(),
        }
    }

    /// Set the routing tag.
    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Remove and return the routing tag.
    pub fn take_client(&mut self) -> Option<String> {
        self.client.take()
    }
}

/// Notices generated by the relay itself.
pub mod notice {
    use super::RelayEnvelope;
    use serde_json::Value;

    pub const DEBUGGER_ATTACHED: &str = "debugger-attached";
    pub const DEBUGGER_DETACHED: &str = "debugger-detached";
    pub const DEBUGGER_PENDING: &str = "debugger-pending";
    pub const CLIENT_CONNECTED: &str = "client-connected";
    pub const CLIENT_DISCONNECTED: &str = "client-disconnected";

    /// Sent to every client when a debugger takes over the session.
    #[must_use]
    pub fn debugger_attached() -> RelayEnvelope {
        RelayEnvelope::new(DEBUGGER_ATTACHED, Value::Null)
    }

    /// Sent to every client when the debugger goes away; the session is paused.
    #[must_use]
    pub fn debugger_detached() -> RelayEnvelope {
        RelayEnvelope::new(DEBUGGER_DETACHED, Value::Null)
    }

    /// Sent once to a client whose messages are being dropped.
    #[must_use]
    pub fn debugger_pending() -> RelayEnvelope {
        RelayEnvelope::new(DEBUGGER_PENDING, Value::Null)
    }

    /// Sent to the debugger when a client joins.
    #[must_use]
    pub fn client_connected(client: &str) -> RelayEnvelope {
        RelayEnvelope::new(CLIENT_CONNECTED, Value::Null).with_client(client)
    }

    /// Sent to the debugger when a client leaves.
    #[must_use]
    pub fn client_disconnected(client: &str) -> RelayEnvelope {
        RelayEnvelope::new(CLIENT_DISCONNECTED, Value::Null).with_client(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_fields_survive() {
        let envelope: RelayEnvelope = serde_json::from_value(json!({
            "type": "executeApplicationScript",
            "payload": { "url": "http://localhost:8081/index.bundle" },
            "id": 7
        }))
        .unwrap();

        assert_eq!(envelope.kind, "executeApplicationScript");
        assert_eq!(envelope.extra.get("id"), Some(&json!(7)));

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["id"], json!(7));
        assert!(value.get("client").is_none());
    }

    #[test]
    fn test_notice_tags_client() {
        let value = serde_json::to_value(notice::client_disconnected("conn-4")).unwrap();
        assert_eq!(
            value,
            json!({ "type": "client-disconnected", "payload": null, "client": "conn-4" })
        );
    }
}
