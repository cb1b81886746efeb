//! In-memory backend and client used by the relay's unit tests.

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::Sink;
use sonic_core::{
    AudioChunk, BackendConnector, BackendSink, BackendStream, Envelope, RelayError, StreamConfig,
};
use std::{
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One call made on the backend sink, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Event(Envelope),
    Audio(AudioChunk),
}

#[derive(Default)]
pub struct FakeBackend {
    submissions: Mutex<Vec<Submission>>,
    closes: AtomicUsize,
}

impl FakeBackend {
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Envelope> {
        self.submissions()
            .into_iter()
            .filter_map(|s| match s {
                Submission::Event(envelope) => Some(envelope),
                Submission::Audio(_) => None,
            })
            .collect()
    }

    pub fn audio(&self) -> Vec<AudioChunk> {
        self.submissions()
            .into_iter()
            .filter_map(|s| match s {
                Submission::Audio(chunk) => Some(chunk),
                Submission::Event(_) => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendSink for FakeBackend {
    async fn send_event(&self, envelope: Envelope) -> Result<(), RelayError> {
        self.submissions.lock().unwrap().push(Submission::Event(envelope));
        Ok(())
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), RelayError> {
        self.submissions.lock().unwrap().push(Submission::Audio(chunk));
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one [`FakeBackend`] whose output is fed by the test.
pub struct FakeConnector {
    pub backend: Arc<FakeBackend>,
    output: Mutex<Option<mpsc::Receiver<Result<Envelope, RelayError>>>>,
    opens: AtomicUsize,
    unavailable: bool,
}

impl FakeConnector {
    /// Returns the connector and the sender that plays the backend's output.
    pub fn new() -> (Arc<Self>, mpsc::Sender<Result<Envelope, RelayError>>) {
        let (tx, rx) = mpsc::channel(16);
        let connector = Arc::new(Self {
            backend: Arc::new(FakeBackend::default()),
            output: Mutex::new(Some(rx)),
            opens: AtomicUsize::new(0),
            unavailable: false,
        });
        (connector, tx)
    }

    /// A connector whose `open` always fails.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            backend: Arc::new(FakeBackend::default()),
            output: Mutex::new(None),
            opens: AtomicUsize::new(0),
            unavailable: true,
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for FakeConnector {
    async fn open(&self, _config: &StreamConfig) -> Result<BackendStream, RelayError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(RelayError::BackendUnavailable("connection refused".into()));
        }
        let output = self
            .output
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RelayError::BackendUnavailable("already opened".into()))?;
        Ok(BackendStream {
            sink: self.backend.clone(),
            events: Box::pin(ReceiverStream::new(output)),
        })
    }
}

#[derive(Default)]
struct ClientLog {
    sent: Vec<Message>,
    closed: bool,
}

/// A client sink that records every message handed to it. It never becomes
/// ready, so a pending delivery can only end by cancellation.
#[derive(Clone, Default)]
pub struct RecordingClient {
    log: Arc<Mutex<ClientLog>>,
}

impl RecordingClient {

    pub fn sent(&self) -> usize {
        self.log.lock().unwrap().sent.len()
    }

    pub fn closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

impl Sink<Message> for RecordingClient {
    type Error = axum::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.log.lock().unwrap().sent.push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.log.lock().unwrap().closed = true;
        Poll::Ready(Ok(()))
    }
}
