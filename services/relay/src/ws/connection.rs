//! Manages the WebSocket connection lifecycle for a relay session.

use super::{
    dispatcher::{Flow, handle_message},
    supervisor::{ConnectionContext, Supervisor},
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, Stream, StreamExt};
use std::{fmt::Display, sync::Arc};
use tracing::{debug, error, info, instrument};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client, inbound) = socket.split();
    let ctx = state.supervisor.on_connection_open(client);
    run_connection(&state.supervisor, ctx, inbound).await;
}

/// The read loop of one connection. Messages are handled strictly in arrival
/// order; the loop ends on close, on a fatal error, on `sessionEnd`, or when
/// a background task trips the shutdown token. Teardown always runs.
#[instrument(name = "ws_connection", skip_all, fields(connection_id = %ctx.id()))]
pub async fn run_connection<S, R, E>(supervisor: &Supervisor, mut ctx: ConnectionContext<S>, mut inbound: R)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    info!("Client connected");
    let shutdown = ctx.shutdown_token();

    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Session ended by the backend or the client sink");
                break;
            }
            message = inbound.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                match handle_message(supervisor, &mut ctx, text.as_str()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::EndSession) => {
                        info!("Client ended the session");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Closing connection");
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close frame");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Client connection lost");
                break;
            }
            None => {
                debug!("Client stream ended");
                break;
            }
        }
    }

    ctx.teardown().await;
}
