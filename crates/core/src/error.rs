//! Error taxonomy for the session relay.
//!
//! Errors fall into two groups. Per-message errors (`MalformedMessage`,
//! `InvalidEventPayload`, `OrphanAudioChunk`) drop the offending message and
//! leave the connection open. Connection-level errors end the session.

/// Errors raised while relaying a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The raw message could not be parsed as an event envelope.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    /// A recognized event type carried a payload missing a required field.
    #[error("Invalid payload for '{event_type}' event: {reason}")]
    InvalidEventPayload { event_type: String, reason: String },
    /// An audio chunk referenced a prompt or content never announced by the client.
    #[error("Orphan audio chunk for prompt '{prompt_id}', content '{content_id}'")]
    OrphanAudioChunk {
        prompt_id: String,
        content_id: String,
    },
    /// The backend stream could not be opened.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// An established backend stream failed or was closed.
    #[error("Backend stream error: {0}")]
    BackendStream(String),
    /// The client connection is gone.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl RelayError {
    /// Returns `true` when only the current message is affected and the
    /// session may keep running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage(_) | Self::InvalidEventPayload { .. } | Self::OrphanAudioChunk { .. }
        )
    }

    pub(crate) fn invalid_payload(event_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEventPayload {
            event_type: event_type.to_string(),
            reason: reason.into(),
        }
    }
}
