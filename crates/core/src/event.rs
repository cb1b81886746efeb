//! Typed inbound events.
//!
//! An [`Envelope`] is classified once, at the boundary, into an
//! [`InboundEvent`]. Only the event types the relay interprets get their own
//! variant; everything else is carried as [`InboundEvent::Other`] and passed
//! through to the backend untouched.

use crate::{envelope::Envelope, error::RelayError};
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub const PROMPT_START: &str = "promptStart";
pub const CONTENT_START: &str = "contentStart";
pub const CONTENT_END: &str = "contentEnd";
pub const AUDIO_INPUT: &str = "audioInput";
pub const SESSION_END: &str = "sessionEnd";
pub const TOOL_USE: &str = "toolUse";

/// Content type announced by `contentStart` for audio input.
pub const AUDIO_CONTENT_TYPE: &str = "AUDIO";
/// Content type announced by `contentStart`/`contentEnd` for tool results.
pub const TOOL_CONTENT_TYPE: &str = "TOOL";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptStartPayload {
    prompt_name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ContentStartPayload {
    #[serde(rename = "type")]
    content_type: Option<String>,
    content_name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AudioInputPayload {
    prompt_name: String,
    content_name: String,
    content: String,
}

/// One chunk of client audio, addressed to a (prompt, content) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub prompt_id: String,
    pub content_id: String,
    /// Raw audio bytes, decoded from the base64 wire form.
    pub audio: Bytes,
}

impl AudioChunk {
    /// Builds a chunk from its base64 wire form.
    pub fn from_base64(
        prompt_id: impl Into<String>,
        content_id: impl Into<String>,
        content: &str,
    ) -> Result<Self, RelayError> {
        let audio = base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| RelayError::invalid_payload(AUDIO_INPUT, format!("content is not base64: {e}")))?;
        Ok(Self {
            prompt_id: prompt_id.into(),
            content_id: content_id.into(),
            audio: Bytes::from(audio),
        })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.audio)
    }
}

/// An inbound client event, classified by its event type.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Opens a prompt; names the prompt every later event refers to.
    PromptStart { prompt_name: String },
    /// Opens a content block. `content_name` is only guaranteed for audio.
    ContentStart {
        content_type: Option<String>,
        content_name: Option<String>,
    },
    /// A chunk of audio for the currently open audio content.
    AudioInput(AudioChunk),
    /// The client is ending the session.
    SessionEnd,
    /// Any other event type, forwarded to the backend as is.
    Other,
}

impl InboundEvent {
    /// Classifies an envelope. Event type matching is exact and case-sensitive.
    pub fn classify(envelope: &Envelope) -> Result<Self, RelayError> {
        match envelope.event_type() {
            PROMPT_START => {
                let payload: PromptStartPayload = parse_payload(envelope)?;
                Ok(Self::PromptStart {
                    prompt_name: payload.prompt_name,
                })
            }
            CONTENT_START => {
                let payload: ContentStartPayload = parse_payload(envelope)?;
                let is_audio = payload.content_type.as_deref() == Some(AUDIO_CONTENT_TYPE);
                if is_audio && payload.content_name.is_none() {
                    return Err(RelayError::invalid_payload(
                        CONTENT_START,
                        "missing field `contentName` for AUDIO content",
                    ));
                }
                Ok(Self::ContentStart {
                    content_type: payload.content_type,
                    content_name: payload.content_name,
                })
            }
            AUDIO_INPUT => {
                let payload: AudioInputPayload = parse_payload(envelope)?;
                let chunk =
                    AudioChunk::from_base64(payload.prompt_name, payload.content_name, &payload.content)?;
                Ok(Self::AudioInput(chunk))
            }
            SESSION_END => Ok(Self::SessionEnd),
            _ => Ok(Self::Other),
        }
    }

    /// Returns `true` for a `contentStart` announcing audio input.
    pub fn is_audio_content_start(&self) -> bool {
        matches!(
            self,
            Self::ContentStart { content_type: Some(t), .. } if t == AUDIO_CONTENT_TYPE
        )
    }
}

fn parse_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, RelayError> {
    T::deserialize(envelope.payload())
        .map_err(|e| RelayError::invalid_payload(envelope.event_type(), e.to_string()))
}
