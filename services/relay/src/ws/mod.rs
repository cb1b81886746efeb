//! WebSocket Session Relay
//!
//! This module contains the per-connection relay between a client WebSocket
//! and a backend model stream. It is structured into submodules:
//!
//! - `connection`: The axum upgrade handler and the connection's read loop.
//! - `supervisor`: Creates the single session of a connection and tears it down.
//! - `dispatcher`: Applies each inbound client event to the session.
//! - `forwarder`: Drains the outbound queue to the client.
//! - `backend_reader`: Moves backend events onto the outbound queue and answers tool use.

mod backend_reader;
pub mod connection;
pub mod dispatcher;
pub mod forwarder;
pub mod supervisor;
#[cfg(test)]
mod testing;

pub use connection::{run_connection, ws_handler};
pub use supervisor::{ConnectionContext, SessionSettings, Supervisor};
