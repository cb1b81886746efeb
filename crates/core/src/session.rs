//! Per-connection session state.

use crate::{
    backend::BackendSink,
    envelope::Envelope,
    error::RelayError,
    event::AudioChunk,
};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Streaming,
    Closing,
    Closed,
}

/// State owned by one client connection once its first event arrived.
///
/// The session exclusively owns the backend stream handle. The two ends of the
/// outbound queue are owned by the tasks that use them, not by the session.
pub struct Session {
    prompt_id: Option<String>,
    audio_content_id: Option<String>,
    state: LifecycleState,
    backend: Arc<dyn BackendSink>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("prompt_id", &self.prompt_id)
            .field("audio_content_id", &self.audio_content_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(backend: Arc<dyn BackendSink>) -> Self {
        Self {
            prompt_id: None,
            audio_content_id: None,
            state: LifecycleState::Uninitialized,
            backend,
        }
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.prompt_id.as_deref()
    }

    pub fn audio_content_id(&self) -> Option<&str> {
        self.audio_content_id.as_deref()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Shared handle to the backend, for tasks that submit on the session's behalf.
    pub fn backend(&self) -> Arc<dyn BackendSink> {
        self.backend.clone()
    }

    pub fn begin_streaming(&mut self) {
        if self.state == LifecycleState::Uninitialized {
            self.state = LifecycleState::Streaming;
            info!("Session streaming");
        }
    }

    /// Records the prompt id. The first value wins; later, different values
    /// are ignored and reported with `false`.
    pub fn set_prompt_id(&mut self, prompt_id: &str) -> bool {
        match &self.prompt_id {
            None => {
                self.prompt_id = Some(prompt_id.to_string());
                info!(prompt_id, "Prompt started");
                true
            }
            Some(current) if current == prompt_id => true,
            Some(current) => {
                warn!(current = %current, ignored = prompt_id, "Prompt id is already set; ignoring new value");
                false
            }
        }
    }

    /// Records the active audio content id, replacing any previous one.
    pub fn set_audio_content_id(&mut self, content_id: &str) {
        if let Some(previous) = self.audio_content_id.replace(content_id.to_string()) {
            debug!(previous = %previous, content_id, "Audio content id replaced");
        } else {
            info!(content_id, "Audio content started");
        }
    }

    /// Checks that a chunk refers to the announced prompt and audio content.
    pub fn check_audio(&self, chunk: &AudioChunk) -> Result<(), RelayError> {
        let prompt_known = self.prompt_id.as_deref() == Some(chunk.prompt_id.as_str());
        let content_known = self.audio_content_id.as_deref() == Some(chunk.content_id.as_str());
        if prompt_known && content_known {
            Ok(())
        } else {
            Err(RelayError::OrphanAudioChunk {
                prompt_id: chunk.prompt_id.clone(),
                content_id: chunk.content_id.clone(),
            })
        }
    }

    /// Submits an audio chunk to the backend's audio channel.
    pub async fn submit_audio(&self, chunk: AudioChunk) -> Result<(), RelayError> {
        self.ensure_streaming()?;
        self.check_audio(&chunk)?;
        self.backend.send_audio(chunk).await
    }

    /// Forwards an envelope to the backend unchanged.
    pub async fn passthrough(&self, envelope: Envelope) -> Result<(), RelayError> {
        self.ensure_streaming()?;
        self.backend.send_event(envelope).await
    }

    /// Closes the backend stream exactly once.
    pub async fn close(&mut self) {
        if matches!(self.state, LifecycleState::Closing | LifecycleState::Closed) {
            return;
        }
        self.state = LifecycleState::Closing;
        self.backend.close().await;
        self.state = LifecycleState::Closed;
        info!("Session closed");
    }

    fn ensure_streaming(&self) -> Result<(), RelayError> {
        match self.state {
            LifecycleState::Streaming => Ok(()),
            LifecycleState::Uninitialized => Err(RelayError::BackendStream(
                "session is not streaming yet".to_string(),
            )),
            LifecycleState::Closing | LifecycleState::Closed => Err(RelayError::BackendStream(
                "session is closed".to_string(),
            )),
        }
    }
}
