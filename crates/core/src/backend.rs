//! Contract of the remote streaming model backend.

use crate::{envelope::Envelope, error::RelayError, event::AudioChunk};
use async_trait::async_trait;
use futures::Stream;
use std::{pin::Pin, sync::Arc};

/// Configuration needed to open one backend stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub model_id: String,
    pub region: String,
}

/// The lazy sequence of events produced by the backend, terminated by stream
/// closure. A stream-level fault is yielded as a final `Err` item.
pub type BackendEvents = Pin<Box<dyn Stream<Item = Result<Envelope, RelayError>> + Send>>;

/// An open duplex stream to the backend, split into its two directions.
pub struct BackendStream {
    pub sink: Arc<dyn BackendSink>,
    pub events: BackendEvents,
}

/// The submission side of an open backend stream.
///
/// Submissions from one caller are delivered in call order; audio and generic
/// events share the same ordered channel.
#[async_trait]
pub trait BackendSink: Send + Sync {
    /// Appends an arbitrary event to the stream.
    async fn send_event(&self, envelope: Envelope) -> Result<(), RelayError>;

    /// Appends an audio chunk for its (prompt, content) pair.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), RelayError>;

    /// Closes the stream. Calling it more than once has no further effect.
    async fn close(&self);
}

/// Opens backend streams, one per session.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn open(&self, config: &StreamConfig) -> Result<BackendStream, RelayError>;
}
