//! Wire envelopes.
//!
//! Payloads inside these envelopes are transport-case JSON; the envelope
//! field names themselves are fixed.

use crate::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful unary response: `{ "result": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: Value,
}

/// Response to a channel create request: `{ "channelId": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreated {
    pub channel_id: String,
}

/// One message on a push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// A value produced by the handler.
    Data(Value),
    /// The stream failed. Terminal.
    Error(BridgeError),
    /// The stream ended normally. Terminal.
    Close,
}

impl ChannelMessage {
    /// Event name used on the push stream.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChannelMessage::Data(_) => "message",
            ChannelMessage::Error(_) => "error",
            ChannelMessage::Close => "close",
        }
    }

    /// JSON body of the push event.
    pub fn payload(&self) -> Value {
        match self {
            ChannelMessage::Data(value) => value.clone(),
            ChannelMessage::Error(err) => {
                serde_json::to_value(err).unwrap_or_else(|_| Value::Object(Default::default()))
            }
            ChannelMessage::Close => Value::Object(Default::default()),
        }
    }

    /// Rebuild a message from a push event name and its JSON body.
    pub fn from_event(event: &str, payload: Value) -> Option<Self> {
        match event {
            "message" => Some(ChannelMessage::Data(payload)),
            "error" => serde_json::from_value(payload)
                .ok()
                .map(ChannelMessage::Error),
            "close" => Some(ChannelMessage::Close),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChannelMessage::Data(_))
    }
}

/// Socket frames in both directions: `{ "event": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl SocketEnvelope {
    /// Event name the server uses to report socket-level failures.
    pub const ERROR_EVENT: &'static str = "error";

    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn error(err: &BridgeError) -> Self {
        Self::new(
            Self::ERROR_EVENT,
            serde_json::to_value(err).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    #[test]
    fn channel_created_uses_client_field_name() {
        let created = ChannelCreated {
            channel_id: "abc".into(),
        };
        assert_eq!(
            serde_json::to_value(created).unwrap(),
            json!({"channelId": "abc"})
        );
    }

    #[test]
    fn push_events_rebuild_messages() {
        let err = BridgeError::channel("boom");
        let msg = ChannelMessage::Error(err.clone());
        assert_eq!(msg.event_name(), "error");
        assert_eq!(
            ChannelMessage::from_event("error", msg.payload()),
            Some(ChannelMessage::Error(err))
        );
        assert_eq!(
            ChannelMessage::from_event("message", json!({"n": 1})),
            Some(ChannelMessage::Data(json!({"n": 1})))
        );
        assert_eq!(ChannelMessage::from_event("bogus", json!({})), None);
    }

    #[test]
    fn socket_envelope_defaults_missing_data() {
        let env: SocketEnvelope = serde_json::from_str(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(env.event, "typing");
        assert_eq!(env.data, Value::Null);

        let env = SocketEnvelope::error(&BridgeError::new(ErrorCode::InvalidArgument, "bad"));
        assert_eq!(env.event, "error");
        assert_eq!(env.data["code"], "INVALID_ARGUMENT");
    }
}
