//! Sonic Relay Library Crate
//!
//! This library contains the service side of the speech-to-speech relay:
//! configuration, logging, the optional tool agent, the health endpoint, the
//! WebSocket session relay, and routing. The `relay` binary is a thin wrapper around this library.

pub mod agent;
pub mod config;
pub mod health;
pub mod logging;
pub mod router;
pub mod state;
pub mod ws;
