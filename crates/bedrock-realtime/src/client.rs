use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_bedrockruntime::{
    Client,
    config::Region,
    error::DisplayErrorContext,
    primitives::Blob,
    types::{
        BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput,
        InvokeModelWithBidirectionalStreamOutput,
    },
};
use sonic_core::{
    AudioChunk, BackendConnector, BackendSink, BackendStream, Envelope, RelayError, StreamConfig,
    builders,
};
use std::sync::{Arc, Mutex};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Output events buffered between the SDK stream and the session's reader.
const EVENT_BUFFER: usize = 64;

/// Opens Nova Sonic streams through the Bedrock runtime API.
#[derive(Clone)]
pub struct BedrockConnector {
    sdk_config: SdkConfig,
}

impl BedrockConnector {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    /// Loads the default AWS credential chain (environment, profile, IAM role)
    /// for `region`.
    pub async fn from_env(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(sdk_config)
    }

    /// Resolves credentials up front, so a missing or rejected identity is
    /// reported when the session opens instead of on the first event.
    async fn check_credentials(&self) -> Result<(), RelayError> {
        let provider = self.sdk_config.credentials_provider().ok_or_else(|| {
            RelayError::BackendUnavailable("no AWS credentials provider configured".to_string())
        })?;
        provider.provide_credentials().await.map_err(|e| {
            RelayError::BackendUnavailable(format!(
                "failed to resolve AWS credentials: {}",
                DisplayErrorContext(&e)
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl BackendConnector for BedrockConnector {
    async fn open(&self, config: &StreamConfig) -> Result<BackendStream, RelayError> {
        self.check_credentials().await?;

        let client_config = aws_sdk_bedrockruntime::config::Builder::from(&self.sdk_config)
            .region(Region::new(config.region.clone()))
            .build();
        let client = Client::from_conf(client_config);

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::channel::<Result<Envelope, RelayError>>(EVENT_BUFFER);
        let model_id = config.model_id.clone();

        info!(model_id = %model_id, region = %config.region, "Opening Bedrock bidirectional stream");

        // `send` does not resolve until the first input chunk is available,
        // so the whole exchange runs in its own task.
        let task = tokio::spawn(async move {
            let input = async_stream::stream! {
                while let Some(bytes) = input_rx.recv().await {
                    let part = BidirectionalInputPayloadPart::builder()
                        .bytes(Blob::new(bytes))
                        .build();
                    yield Ok(InvokeModelWithBidirectionalStreamInput::Chunk(part));
                }
                debug!("Bedrock input stream finished");
            };

            let output = match client
                .invoke_model_with_bidirectional_stream()
                .model_id(model_id)
                .body(input.into())
                .send()
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    let reason = format!("failed to start stream: {}", DisplayErrorContext(&e));
                    warn!(%reason, "Bedrock stream could not be started");
                    let _ = event_tx.send(Err(RelayError::BackendStream(reason))).await;
                    return;
                }
            };

            let mut body = output.body;
            loop {
                match body.recv().await {
                    Ok(Some(InvokeModelWithBidirectionalStreamOutput::Chunk(part))) => {
                        let Some(bytes) = part.bytes() else {
                            continue;
                        };
                        match decode_chunk(bytes.as_ref()) {
                            Ok(Some(envelope)) => {
                                if event_tx.send(Ok(envelope)).await.is_err() {
                                    debug!("Event receiver dropped; stopping Bedrock reader");
                                    break;
                                }
                            }
                            Ok(None) => debug!("Ignoring Bedrock chunk without an event"),
                            Err(e) => warn!(error = %e, "Ignoring undecodable Bedrock chunk"),
                        }
                    }
                    Ok(Some(other)) => debug!(?other, "Ignoring unknown Bedrock output"),
                    Ok(None) => {
                        info!("Bedrock stream ended");
                        break;
                    }
                    Err(e) => {
                        let reason = DisplayErrorContext(&e).to_string();
                        warn!(%reason, "Bedrock stream failed");
                        let _ = event_tx.send(Err(RelayError::BackendStream(reason))).await;
                        break;
                    }
                }
            }
        });

        let sink = Arc::new(BedrockSink {
            input: Mutex::new(Some(input_tx)),
            task: Mutex::new(Some(task)),
        });

        Ok(BackendStream {
            sink,
            events: Box::pin(ReceiverStream::new(event_rx)),
        })
    }
}

/// Submission side of one Bedrock stream.
pub struct BedrockSink {
    input: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BedrockSink {
    fn submit(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        let guard = self
            .input
            .lock()
            .map_err(|_| RelayError::BackendStream("input lock poisoned".to_string()))?;
        let sender = guard
            .as_ref()
            .ok_or_else(|| RelayError::BackendStream("stream is closed".to_string()))?;
        sender
            .send(bytes)
            .map_err(|_| RelayError::BackendStream("stream task has stopped".to_string()))
    }
}

#[async_trait]
impl BackendSink for BedrockSink {
    async fn send_event(&self, envelope: Envelope) -> Result<(), RelayError> {
        debug!(event_type = envelope.event_type(), "Sending event to Bedrock");
        self.submit(encode_chunk(&envelope))
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), RelayError> {
        self.submit(encode_chunk(&builders::audio_input(&chunk)))
    }

    async fn close(&self) {
        let sender = self.input.lock().ok().and_then(|mut input| input.take());
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if sender.is_none() && task.is_none() {
            return;
        }
        drop(sender);
        if let Some(task) = task {
            task.abort();
        }
        info!("Bedrock stream closed");
    }
}

fn encode_chunk(envelope: &Envelope) -> Vec<u8> {
    envelope.encode().into_bytes()
}

fn decode_chunk(bytes: &[u8]) -> Result<Option<Envelope>, RelayError> {
    Envelope::decode_bytes(bytes)
}
