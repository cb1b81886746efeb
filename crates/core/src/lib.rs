//! Protocol and session logic for relaying a speech-to-speech client to a
//! streaming model backend.
//!
//! Nothing in this crate knows about WebSockets or a particular backend
//! service; transports plug in through [`backend::BackendConnector`] and the
//! service crate.

pub mod agent;
pub mod backend;
pub mod builders;
pub mod envelope;
pub mod error;
pub mod event;
pub mod llm_client;
pub mod session;
pub mod tools;

pub use backend::{BackendConnector, BackendEvents, BackendSink, BackendStream, StreamConfig};
pub use envelope::Envelope;
pub use error::RelayError;
pub use event::{AudioChunk, InboundEvent};
pub use session::{LifecycleState, Session};
pub use tools::{ToolAgent, ToolDispatcher};
