//! Outbound forwarder: drains a session's outbound queue to the client.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use sonic_core::{Envelope, builders};
use std::{fmt::Display, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a forwarder stopped. None of these is a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderExit {
    /// Teardown asked it to stop.
    Cancelled,
    /// A delivery failed because the client is gone.
    ClientClosed,
    /// Every producer of the outbound queue has gone away.
    QueueClosed,
}

enum Next {
    Deliver(Envelope),
    Stop(ForwarderExit),
}

/// Delivers queued events to `client` in order until cancelled, until the
/// client goes away, or until the queue closes. Cancellation wins over a
/// ready event and aborts a pending delivery. Losing the client or the queue
/// trips `shutdown`. Returns the client sink so the caller can close the
/// connection.
pub async fn run_forwarder<S>(
    mut client: S,
    mut queue: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    keepalive: Option<Duration>,
) -> (S, ForwarderExit)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut keepalive = keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Stop(ForwarderExit::Cancelled),
            event = queue.recv() => match event {
                Some(envelope) => Next::Deliver(envelope),
                None => {
                    shutdown.cancel();
                    Next::Stop(ForwarderExit::QueueClosed)
                }
            },
            _ = tick(&mut keepalive) => Next::Deliver(builders::ping()),
        };
        let envelope = match next {
            Next::Deliver(envelope) => envelope,
            Next::Stop(exit) => break exit,
        };

        debug!(event_type = envelope.event_type(), "Delivering event to client");
        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = client.send(Message::Text(envelope.encode().into())) => Some(result),
        };
        match delivered {
            None => break ForwarderExit::Cancelled,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Client connection closed during delivery");
                shutdown.cancel();
                break ForwarderExit::ClientClosed;
            }
        }
    };

    info!(?exit, "Forwarder stopped");
    (client, exit)
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
