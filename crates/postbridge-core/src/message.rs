//! Protocol messages.
//!
//! Every message carries the [`PROTOCOL_TAG`] field, whose value is the
//! message kind. Anything else sharing the channel fails to decode and is
//! treated as unrelated traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the field that marks a value as postbridge traffic.
pub const PROTOCOL_TAG: &str = "postbridge";

/// Correlates a `Reply` with the `Call` that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a remote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Fulfilled,
    Rejected,
}

/// Messages exchanged by both sides of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "postbridge", rename_all = "camelCase")]
pub enum Message {
    /// Responder announces itself.
    Syn,
    /// Initiator answers a `Syn` with its exposed key-paths.
    #[serde(rename_all = "camelCase")]
    SynAck { method_names: Vec<String> },
    /// Responder's exposed key-paths; completes the handshake.
    #[serde(rename_all = "camelCase")]
    Ack { method_names: Vec<String> },
    /// Invoke a method on the peer.
    #[serde(rename_all = "camelCase")]
    Call {
        id: CallId,
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Outcome of an earlier `Call`.
    #[serde(rename_all = "camelCase")]
    Reply {
        id: CallId,
        resolution: Resolution,
        #[serde(default)]
        return_value: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        return_value_is_error: bool,
    },
}

impl Message {
    /// Decode a channel payload. Returns `None` for unrelated traffic.
    pub fn from_value(data: &Value) -> Option<Self> {
        data.get(PROTOCOL_TAG)?;
        Self::deserialize(data).ok()
    }

    /// Encode for a channel that transports structured values.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syn => "syn",
            Self::SynAck { .. } => "synAck",
            Self::Ack { .. } => "ack",
            Self::Call { .. } => "call",
            Self::Reply { .. } => "reply",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn syn_wire_shape() {
        assert_eq!(Message::Syn.to_value().unwrap(), json!({ "postbridge": "syn" }));
    }

    #[test]
    fn handshake_fields_are_camel_case() {
        let msg = Message::SynAck {
            method_names: vec!["math.add".into()],
        };
        assert_eq!(
            msg.to_value().unwrap(),
            json!({ "postbridge": "synAck", "methodNames": ["math.add"] })
        );
    }

    #[test]
    fn reply_omits_false_error_flag() {
        let reply = Message::Reply {
            id: CallId(3),
            resolution: Resolution::Fulfilled,
            return_value: json!(5),
            return_value_is_error: false,
        };
        assert_eq!(
            reply.to_value().unwrap(),
            json!({ "postbridge": "reply", "id": 3, "resolution": "fulfilled", "returnValue": 5 })
        );
    }

    #[test]
    fn decode_call_with_missing_args() {
        let data = json!({ "postbridge": "call", "id": 9, "methodName": "ping" });
        assert_eq!(
            Message::from_value(&data),
            Some(Message::Call {
                id: CallId(9),
                method_name: "ping".into(),
                args: vec![],
            })
        );
    }

    #[test]
    fn unrelated_traffic_is_not_a_message() {
        assert_eq!(Message::from_value(&json!({ "type": "chat", "text": "hi" })), None);
        assert_eq!(Message::from_value(&json!("syn")), None);
        assert_eq!(Message::from_value(&json!({ "postbridge": "bogus" })), None);
    }
}
