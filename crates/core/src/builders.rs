//! Constructors for events the relay itself emits.

use crate::{
    envelope::Envelope,
    event::{AUDIO_INPUT, CONTENT_END, CONTENT_START, TOOL_CONTENT_TYPE, AudioChunk},
};
use serde_json::json;

pub const PING: &str = "ping";
pub const TOOL_RESULT: &str = "toolResult";

/// The `audioInput` event carrying one chunk to the backend.
pub fn audio_input(chunk: &AudioChunk) -> Envelope {
    Envelope::new(
        AUDIO_INPUT,
        json!({
            "promptName": chunk.prompt_id,
            "contentName": chunk.content_id,
            "content": chunk.to_base64(),
        }),
    )
}

/// Opens a tool result content block answering `tool_use_id`.
pub fn content_start_tool(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Envelope {
    Envelope::new(
        CONTENT_START,
        json!({
            "promptName": prompt_name,
            "contentName": content_name,
            "interactive": false,
            "type": TOOL_CONTENT_TYPE,
            "role": "TOOL",
            "toolResultInputConfiguration": {
                "toolUseId": tool_use_id,
                "type": "TEXT",
                "textInputConfiguration": {
                    "mediaType": "text/plain"
                }
            }
        }),
    )
}

pub fn tool_result(prompt_name: &str, content_name: &str, content: &str) -> Envelope {
    Envelope::new(
        TOOL_RESULT,
        json!({
            "promptName": prompt_name,
            "contentName": content_name,
            "content": content,
        }),
    )
}

pub fn content_end(prompt_name: &str, content_name: &str) -> Envelope {
    Envelope::new(
        CONTENT_END,
        json!({
            "promptName": prompt_name,
            "contentName": content_name,
        }),
    )
}

/// Application-level keepalive sent to idle clients.
pub fn ping() -> Envelope {
    Envelope::new(PING, json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_input_reencodes_chunk() {
        let chunk = AudioChunk::from_base64("p1", "c1", "QUJD").unwrap();
        assert_eq!(
            audio_input(&chunk).encode(),
            r#"{"event":{"audioInput":{"promptName":"p1","contentName":"c1","content":"QUJD"}}}"#
        );
    }

    #[test]
    fn test_tool_result_sequence_shares_names() {
        let start = content_start_tool("p1", "tool-1", "use-9");
        let result = tool_result("p1", "tool-1", r#"{"result":"ok"}"#);
        let end = content_end("p1", "tool-1");

        assert_eq!(start.event_type(), "contentStart");
        assert_eq!(start.payload_str("type"), Some("TOOL"));
        assert_eq!(
            start.payload()["toolResultInputConfiguration"]["toolUseId"],
            "use-9"
        );
        assert_eq!(result.event_type(), "toolResult");
        assert_eq!(result.payload_str("content"), Some(r#"{"result":"ok"}"#));
        assert_eq!(end.event_type(), "contentEnd");
        for envelope in [&start, &result, &end] {
            assert_eq!(envelope.payload_str("promptName"), Some("p1"));
            assert_eq!(envelope.payload_str("contentName"), Some("tool-1"));
        }
    }

    #[test]
    fn test_ping_shape() {
        assert_eq!(ping().encode(), r#"{"event":{"ping":{}}}"#);
    }
}
