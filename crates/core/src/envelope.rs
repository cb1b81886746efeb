//! Event Envelope Codec
//!
//! Every message exchanged with the client and the backend is a JSON envelope
//! of the shape `{"event": {"<eventType>": <payload>}}`. Gateways may wrap the
//! envelope once more as a JSON-encoded string under a `body` field.

use crate::error::RelayError;
use serde_json::{Map, Value};
use tracing::warn;

const EVENT_FIELD: &str = "event";
const BODY_FIELD: &str = "body";

/// A decoded event envelope carrying exactly one named event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    event_type: String,
    payload: Value,
    /// Top-level fields other than `event`, kept so encoding stays lossless.
    extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            extra: Map::new(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Reads a string field from the payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Decodes a raw text message.
    ///
    /// Returns `Ok(None)` when the message is valid JSON but carries no
    /// `event` field; such messages (acks and the like) are not session events.
    pub fn decode(raw: &str) -> Result<Option<Self>, RelayError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RelayError::MalformedMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Decodes a raw binary frame with the same rules as [`Envelope::decode`].
    pub fn decode_bytes(raw: &[u8]) -> Result<Option<Self>, RelayError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| RelayError::MalformedMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Option<Self>, RelayError> {
        let Value::Object(mut object) = value else {
            return Err(RelayError::MalformedMessage(
                "top-level value is not an object".to_string(),
            ));
        };

        if let Some(body) = object.remove(BODY_FIELD) {
            object = match body {
                Value::String(inner) => match serde_json::from_str(&inner) {
                    Ok(Value::Object(inner)) => inner,
                    Ok(_) => {
                        return Err(RelayError::MalformedMessage(
                            "`body` does not contain an object".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(RelayError::MalformedMessage(format!(
                            "`body` is not valid JSON: {e}"
                        )));
                    }
                },
                Value::Object(inner) => inner,
                _ => {
                    return Err(RelayError::MalformedMessage(
                        "`body` is neither a string nor an object".to_string(),
                    ));
                }
            };
        }

        let Some(event) = object.remove(EVENT_FIELD) else {
            return Ok(None);
        };
        let Value::Object(event) = event else {
            return Err(RelayError::MalformedMessage(
                "`event` is not an object".to_string(),
            ));
        };

        let event_count = event.len();
        let Some((event_type, payload)) = event.into_iter().next() else {
            return Err(RelayError::MalformedMessage(
                "`event` carries no event type".to_string(),
            ));
        };
        if event_count > 1 {
            warn!(%event_type, event_count, "Envelope carries several event types; using the first");
        }

        Ok(Some(Self {
            event_type,
            payload,
            extra: object,
        }))
    }

    pub fn to_value(&self) -> Value {
        let mut event = Map::with_capacity(1);
        event.insert(self.event_type.clone(), self.payload.clone());

        let mut object = Map::with_capacity(self.extra.len() + 1);
        object.insert(EVENT_FIELD.to_string(), Value::Object(event));
        for (key, value) in &self.extra {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Encodes the envelope as a JSON text message.
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_plain_envelope() {
        let envelope = Envelope::decode(r#"{"event":{"promptStart":{"promptName":"p1"}}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.event_type(), "promptStart");
        assert_eq!(envelope.payload_str("promptName"), Some("p1"));
    }

    #[test]
    fn test_decode_unwraps_string_body() {
        let inner = r#"{"event":{"contentStart":{"type":"AUDIO","contentName":"c1"}}}"#;
        let raw = json!({ "body": inner }).to_string();

        let envelope = Envelope::decode(&raw).unwrap().unwrap();
        assert_eq!(envelope.event_type(), "contentStart");
        assert_eq!(envelope.payload_str("contentName"), Some("c1"));
    }

    #[test]
    fn test_decode_accepts_object_body() {
        let raw = r#"{"body":{"event":{"sessionEnd":{}}}}"#;
        let envelope = Envelope::decode(raw).unwrap().unwrap();
        assert_eq!(envelope.event_type(), "sessionEnd");
    }

    #[test]
    fn test_message_without_event_is_ignored() {
        assert_eq!(Envelope::decode(r#"{"ack":true}"#).unwrap(), None);
        let wrapped = json!({ "body": r#"{"status":"ok"}"# }).to_string();
        assert_eq!(Envelope::decode(&wrapped).unwrap(), None);
    }

    #[test]
    fn test_malformed_messages() {
        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"body":"{broken"}"#,
            r#"{"body":42}"#,
            r#"{"event":"promptStart"}"#,
            r#"{"event":{}}"#,
        ] {
            let err = Envelope::decode(raw).unwrap_err();
            assert!(
                matches!(err, RelayError::MalformedMessage(_)),
                "expected MalformedMessage for {raw}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_first_event_key_is_authoritative() {
        let raw = r#"{"event":{"textInput":{"content":"hi"},"audioInput":{}}}"#;
        let envelope = Envelope::decode(raw).unwrap().unwrap();
        assert_eq!(envelope.event_type(), "textInput");
    }

    #[test]
    fn test_encode_is_lossless_for_decoded_envelopes() {
        let samples = [
            r#"{"event":{"promptStart":{"promptName":"p1","textOutputConfiguration":{"mediaType":"text/plain"}}}}"#,
            r#"{"event":{"audioInput":{"promptName":"p1","contentName":"c1","content":"QUJD"}}}"#,
            r#"{"event":{"usageEvent":{"totalTokens":12}},"timestamp":1718000000000}"#,
            r#"{"event":{"sessionEnd":{}}}"#,
        ];
        for raw in samples {
            let decoded = Envelope::decode(raw).unwrap().unwrap();
            let reencoded = decoded.encode();
            assert_eq!(reencoded, raw);
            assert_eq!(Envelope::decode(&reencoded).unwrap().unwrap(), decoded);
        }
    }

    #[test]
    fn test_decode_bytes_matches_text_decoding() {
        let raw = br#"{"event":{"textOutput":{"content":"hello","role":"ASSISTANT"}}}"#;
        let envelope = Envelope::decode_bytes(raw).unwrap().unwrap();
        assert_eq!(envelope.event_type(), "textOutput");
        assert_eq!(envelope.payload()["role"], "ASSISTANT");
    }
}
