//! Inbound dispatcher: applies one client message to the connection.

use super::supervisor::{ConnectionContext, Supervisor};
use axum::extract::ws::Message;
use futures_util::Sink;
use sonic_core::{Envelope, InboundEvent, RelayError};
use std::fmt::Display;
use tracing::{debug, info, warn};

/// What the connection loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The client ended the session; tear the connection down.
    EndSession,
}

/// Handles one raw text message. Per-message problems are logged and
/// swallowed; only errors that end the connection are returned.
pub async fn handle_message<S>(
    supervisor: &Supervisor,
    ctx: &mut ConnectionContext<S>,
    raw: &str,
) -> Result<Flow, RelayError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    match dispatch(supervisor, ctx, raw).await {
        Ok(flow) => Ok(flow),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Dropping client message");
            Ok(Flow::Continue)
        }
        Err(e) => Err(e),
    }
}

async fn dispatch<S>(
    supervisor: &Supervisor,
    ctx: &mut ConnectionContext<S>,
    raw: &str,
) -> Result<Flow, RelayError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let Some(envelope) = Envelope::decode(raw)? else {
        debug!("Ignoring message without an event");
        return Ok(Flow::Continue);
    };

    let session = supervisor.ensure_session(ctx).await?;
    let event = InboundEvent::classify(&envelope)?;
    let is_audio_start = event.is_audio_content_start();

    match event {
        InboundEvent::PromptStart { prompt_name } => {
            session.set_prompt_id(&prompt_name);
            session.passthrough(envelope).await?;
        }
        InboundEvent::ContentStart { content_name, .. } => {
            if is_audio_start && let Some(content_name) = content_name {
                session.set_audio_content_id(&content_name);
            }
            session.passthrough(envelope).await?;
        }
        InboundEvent::AudioInput(chunk) => {
            debug!(
                prompt_id = %chunk.prompt_id,
                content_id = %chunk.content_id,
                bytes = chunk.audio.len(),
                "Audio chunk received"
            );
            session.submit_audio(chunk).await?;
        }
        InboundEvent::SessionEnd => {
            info!("Client sent sessionEnd");
            session.passthrough(envelope).await?;
            return Ok(Flow::EndSession);
        }
        InboundEvent::Other => {
            debug!(event_type = envelope.event_type(), "Passing event through");
            session.passthrough(envelope).await?;
        }
    }
    Ok(Flow::Continue)
}
