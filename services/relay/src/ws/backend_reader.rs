//! Moves backend events onto the outbound queue and answers tool use.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use sonic_core::{
    BackendEvents, BackendSink, Envelope, ToolDispatcher, builders,
    event::{CONTENT_END, TOOL_CONTENT_TYPE, TOOL_USE},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The most recent `toolUse` request, answered when its content block ends.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ToolUse {
    tool_name: String,
    tool_use_id: String,
    prompt_name: Option<String>,
    #[serde(default)]
    content: Value,
}

impl ToolUse {
    fn input(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Reads `events` until the backend stream ends or fails, enqueuing every
/// event for the client. Suspends while the outbound queue is full. Returning
/// drops the queue's only producer, which lets the forwarder flush what is
/// left and end the connection.
pub async fn run_backend_reader(
    mut events: BackendEvents,
    backend: Arc<dyn BackendSink>,
    queue: mpsc::Sender<Envelope>,
    tools: ToolDispatcher,
) {
    let mut pending_tool: Option<ToolUse> = None;

    while let Some(item) = events.next().await {
        let envelope = match item {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Backend stream failed");
                break;
            }
        };

        match envelope.event_type() {
            TOOL_USE => match ToolUse::deserialize(envelope.payload()) {
                Ok(tool_use) => {
                    info!(tool_name = %tool_use.tool_name, tool_use_id = %tool_use.tool_use_id, "Tool use requested");
                    pending_tool = Some(tool_use);
                }
                Err(e) => warn!(error = %e, "Ignoring malformed toolUse event"),
            },
            CONTENT_END if envelope.payload_str("type") == Some(TOOL_CONTENT_TYPE) => {
                if let Some(tool_use) = pending_tool.take() {
                    answer_tool_use(&envelope, tool_use, &tools, backend.as_ref()).await;
                }
            }
            _ => {}
        }

        if queue.send(envelope).await.is_err() {
            debug!("Outbound queue closed; stopping backend reader");
            break;
        }
    }

    info!("Backend reader stopped");
}

/// Resolves a tool and sends its result back as a TOOL content block.
/// Failures are logged; they never end the session.
async fn answer_tool_use(
    content_end: &Envelope,
    tool_use: ToolUse,
    tools: &ToolDispatcher,
    backend: &dyn BackendSink,
) {
    let Some(prompt_name) = content_end
        .payload_str("promptName")
        .map(str::to_string)
        .or_else(|| tool_use.prompt_name.clone())
    else {
        warn!(tool_use_id = %tool_use.tool_use_id, "Tool use has no prompt name; not answering");
        return;
    };

    let result = tools.invoke(&tool_use.tool_name, &tool_use.input()).await;
    let content_name = Uuid::new_v4().to_string();

    let replies = [
        builders::content_start_tool(&prompt_name, &content_name, &tool_use.tool_use_id),
        builders::tool_result(&prompt_name, &content_name, &result),
        builders::content_end(&prompt_name, &content_name),
    ];
    for reply in replies {
        if let Err(e) = backend.send_event(reply).await {
            warn!(error = %e, tool_use_id = %tool_use.tool_use_id, "Failed to send tool result");
            return;
        }
    }
    debug!(tool_use_id = %tool_use.tool_use_id, "Tool result sent");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::testing::{FakeBackend, Submission};
    use serde_json::json;
    use sonic_core::RelayError;
    use tokio_stream::wrappers::ReceiverStream;

    fn events_from(items: Vec<Result<Envelope, RelayError>>) -> BackendEvents {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_enqueues_events_and_closes_queue_on_end() {
        let backend = Arc::new(FakeBackend::default());
        let (queue_tx, mut queue_rx) = mpsc::channel(8);

        let events = events_from(vec![
            Ok(Envelope::new("textOutput", json!({ "content": "hi" }))),
            Ok(Envelope::new("audioOutput", json!({ "content": "QUJD" }))),
        ]);
        run_backend_reader(events, backend, queue_tx, ToolDispatcher::default()).await;

        assert_eq!(queue_rx.recv().await.unwrap().event_type(), "textOutput");
        assert_eq!(queue_rx.recv().await.unwrap().event_type(), "audioOutput");
        assert!(queue_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_stops_reader() {
        let backend = Arc::new(FakeBackend::default());
        let (queue_tx, mut queue_rx) = mpsc::channel(8);

        let events = events_from(vec![
            Err(RelayError::BackendStream("reset".into())),
            Ok(Envelope::new("textOutput", json!({}))),
        ]);
        run_backend_reader(events, backend, queue_tx, ToolDispatcher::default()).await;

        assert!(queue_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tool_use_sends_result_triple_and_forwards_events() {
        let backend = Arc::new(FakeBackend::default());
        let (queue_tx, mut queue_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);

        let reader = tokio::spawn(run_backend_reader(
            Box::pin(ReceiverStream::new(events_rx)),
            backend.clone(),
            queue_tx,
            ToolDispatcher::default(),
        ));

        events_tx
            .send(Ok(Envelope::new(
                TOOL_USE,
                json!({
                    "promptName": "p1",
                    "toolName": "getDateTool",
                    "toolUseId": "use-1",
                    "content": "{}",
                }),
            )))
            .await
            .unwrap();
        events_tx
            .send(Ok(Envelope::new(
                CONTENT_END,
                json!({ "promptName": "p1", "type": "TOOL", "stopReason": "TOOL_USE" }),
            )))
            .await
            .unwrap();

        assert_eq!(queue_rx.recv().await.unwrap().event_type(), TOOL_USE);
        assert_eq!(queue_rx.recv().await.unwrap().event_type(), CONTENT_END);

        let sent = backend.events();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].event_type(), "contentStart");
        assert_eq!(sent[0].payload()["toolResultInputConfiguration"]["toolUseId"], "use-1");
        assert_eq!(sent[1].event_type(), "toolResult");
        assert_eq!(sent[2].event_type(), "contentEnd");
        let content_name = sent[0].payload_str("contentName").unwrap().to_string();
        for event in &sent {
            assert_eq!(event.payload_str("promptName"), Some("p1"));
            assert_eq!(event.payload_str("contentName"), Some(content_name.as_str()));
        }
        let result: Value =
            serde_json::from_str(sent[1].payload_str("content").unwrap()).unwrap();
        assert_eq!(result["timezone"], "UTC");
        assert!(matches!(backend.submissions()[0], Submission::Event(_)));

        drop(events_tx);
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_content_end_without_tool_use_sends_nothing() {
        let backend = Arc::new(FakeBackend::default());
        let (queue_tx, mut queue_rx) = mpsc::channel(8);

        let events = events_from(vec![Ok(Envelope::new(
            CONTENT_END,
            json!({ "promptName": "p1", "type": "TOOL" }),
        ))]);
        run_backend_reader(events, backend.clone(), queue_tx, ToolDispatcher::default()).await;

        assert_eq!(queue_rx.recv().await.unwrap().event_type(), CONTENT_END);
        assert!(backend.submissions().is_empty());
    }
}
