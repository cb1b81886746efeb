//! Session Manager Supervisor
//!
//! The supervisor is the only place that opens a backend stream or starts and
//! stops the per-session tasks. A connection gets at most one session, created
//! lazily by [`Supervisor::ensure_session`], and every way a connection can end
//! funnels into [`ConnectionContext::teardown`].

use super::{
    backend_reader::run_backend_reader,
    forwarder::{ForwarderExit, run_forwarder},
};
use crate::config::Config;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use sonic_core::{BackendConnector, RelayError, Session, StreamConfig, ToolDispatcher};
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

/// Per-session settings shared by every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub stream: StreamConfig,
    pub queue_capacity: usize,
    pub keepalive: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stream: config.stream_config(),
            queue_capacity: config.outbound_queue_capacity,
            keepalive: config.keepalive_interval,
        }
    }
}

/// Creates sessions and owns the process-scoped collaborators they use.
pub struct Supervisor {
    settings: SessionSettings,
    connector: Arc<dyn BackendConnector>,
    tools: ToolDispatcher,
}

impl Supervisor {
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn BackendConnector>,
        tools: ToolDispatcher,
    ) -> Self {
        Self {
            settings,
            connector,
            tools,
        }
    }

    /// Registers a new client connection. No session is created yet.
    pub fn on_connection_open<S>(&self, client: S) -> ConnectionContext<S> {
        ConnectionContext {
            id: Uuid::new_v4(),
            client: Some(client),
            session: None,
            tasks: None,
            shutdown: CancellationToken::new(),
            torn_down: false,
        }
    }

    /// Returns the connection's session, opening the backend stream and
    /// starting the session's tasks on first use. On failure nothing is
    /// recorded on the context.
    pub async fn ensure_session<'a, S>(
        &self,
        ctx: &'a mut ConnectionContext<S>,
    ) -> Result<&'a mut Session, RelayError>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        if ctx.session.is_none() {
            self.start_session(ctx).await?;
        }
        ctx.session.as_mut().ok_or(RelayError::ConnectionClosed)
    }

    async fn start_session<S>(&self, ctx: &mut ConnectionContext<S>) -> Result<(), RelayError>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        if ctx.torn_down {
            return Err(RelayError::ConnectionClosed);
        }
        let stream = self.connector.open(&self.settings.stream).await?;
        let Some(client) = ctx.client.take() else {
            stream.sink.close().await;
            return Err(RelayError::ConnectionClosed);
        };

        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_capacity);
        let mut session = Session::new(stream.sink.clone());

        let forwarder_cancel = CancellationToken::new();
        let forwarder = tokio::spawn(
            run_forwarder(
                client,
                queue_rx,
                forwarder_cancel.clone(),
                ctx.shutdown.clone(),
                self.settings.keepalive,
            )
            .in_current_span(),
        );
        let reader = tokio::spawn(
            run_backend_reader(
                stream.events,
                stream.sink,
                queue_tx,
                self.tools.clone(),
            )
            .in_current_span(),
        );

        session.begin_streaming();
        ctx.session = Some(session);
        ctx.tasks = Some(SessionTasks {
            forwarder,
            forwarder_cancel,
            reader,
        });
        info!(model_id = %self.settings.stream.model_id, "Session created");
        Ok(())
    }
}

struct SessionTasks<S> {
    forwarder: JoinHandle<(S, ForwarderExit)>,
    forwarder_cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Everything the relay holds for one client connection.
pub struct ConnectionContext<S> {
    id: Uuid,
    client: Option<S>,
    session: Option<Session>,
    tasks: Option<SessionTasks<S>>,
    shutdown: CancellationToken,
    torn_down: bool,
}

impl<S> ConnectionContext<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Tripped when a background task decides the connection is over.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns `true` while the forwarder task is still running.
    pub fn forwarder_running(&self) -> bool {
        self.tasks
            .as_ref()
            .is_some_and(|tasks| !tasks.forwarder.is_finished())
    }

    /// Shuts the connection down. Safe to call any number of times; only the
    /// first call has an effect and it never fails.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let tasks = self.tasks.take();
        if let Some(tasks) = &tasks {
            tasks.forwarder_cancel.cancel();
        }
        let (forwarder, reader) = match tasks {
            Some(tasks) => (Some(tasks.forwarder), Some(tasks.reader)),
            None => (None, None),
        };

        if let Some(forwarder) = forwarder {
            match forwarder.await {
                Ok((client, exit)) => {
                    debug!(?exit, "Forwarder joined");
                    self.client = Some(client);
                }
                Err(e) if e.is_cancelled() => debug!("Forwarder was already cancelled"),
                Err(e) => error!(error = %e, "Forwarder task failed"),
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.close().await;
        }

        if let Some(reader) = reader {
            reader.abort();
            if let Err(e) = reader.await
                && !e.is_cancelled()
            {
                error!(error = %e, "Backend reader task failed");
            }
        }

        if let Some(mut client) = self.client.take()
            && let Err(e) = client.close().await
        {
            debug!(error = %e, "Client connection was already closed");
        }

        self.shutdown.cancel();
        info!("Connection torn down");
    }
}
