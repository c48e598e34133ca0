//! Real-time wire messages.
//!
//! Both directions carry JSON objects of the form
//!
//! ```text
//! { "id": "<string>", "typ": <0..=6>, "dat": <any JSON> }
//! ```

use crate::SyftError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Message type, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    System = 0,
    Error = 1,
    FileWrite = 2,
    FileDelete = 3,
    Ack = 4,
    Nack = 5,
    Http = 6,
}

impl MessageType {
    /// Look up a type by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MessageType::System),
            1 => Some(MessageType::Error),
            2 => Some(MessageType::FileWrite),
            3 => Some(MessageType::FileDelete),
            4 => Some(MessageType::Ack),
            5 => Some(MessageType::Nack),
            6 => Some(MessageType::Http),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        MessageType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown message type {}", code)))
    }
}

/// A single real-time message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    typ: MessageType,
    #[serde(default)]
    dat: serde_json::Value,
}

impl Message {
    /// Create a message with a caller-assigned id.
    pub fn new(id: impl Into<String>, typ: MessageType, dat: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            typ,
            dat,
        }
    }

    /// Create a message with a generated id.
    pub fn with_generated_id(typ: MessageType, dat: serde_json::Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), typ, dat)
    }

    /// Keep-alive SYSTEM message.
    pub fn heartbeat() -> Self {
        Self::with_generated_id(
            MessageType::System,
            serde_json::json!({
                "type": "heartbeat",
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn typ(&self) -> MessageType {
        self.typ
    }

    pub fn dat(&self) -> &serde_json::Value {
        &self.dat
    }

    /// Whether this is a heartbeat produced by `heartbeat()`.
    pub fn is_heartbeat(&self) -> bool {
        self.typ == MessageType::System
            && self.dat.get("type").and_then(|t| t.as_str()) == Some("heartbeat")
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, SyftError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn decode(frame: &str) -> Result<Self, SyftError> {
        serde_json::from_str(frame).map_err(|e| SyftError::MalformedFrame {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let msg = Message::new("m1", MessageType::FileWrite, json!({"path": "a.txt"}));
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"id": "m1", "typ": 2, "dat": {"path": "a.txt"}}));
    }

    #[test]
    fn test_decode_all_types() {
        for (code, typ) in [
            (0, MessageType::System),
            (1, MessageType::Error),
            (3, MessageType::FileDelete),
            (4, MessageType::Ack),
            (5, MessageType::Nack),
            (6, MessageType::Http),
        ] {
            let frame = format!(r#"{{"id":"x","typ":{},"dat":null}}"#, code);
            assert_eq!(Message::decode(&frame).unwrap().typ(), typ);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Message::decode(r#"{"id":"x","typ":9,"dat":{}}"#).unwrap_err();
        assert!(matches!(err, SyftError::MalformedFrame { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode(r#"{"typ":0}"#).is_err());
    }

    #[test]
    fn test_heartbeat() {
        let msg = Message::heartbeat();
        assert!(msg.is_heartbeat());
        assert!(!msg.id().is_empty());
        assert!(msg.dat()["timestamp"].as_i64().unwrap() > 0);
    }
}
