//! Amazon Bedrock bidirectional streaming backend.
//!
//! Implements [`sonic_core::BackendConnector`] on top of
//! `InvokeModelWithBidirectionalStream`. Each submitted event is serialized to
//! its `{"event": {...}}` JSON form and sent as one input chunk; every output
//! chunk is decoded back into an [`sonic_core::Envelope`].

mod client;

pub use client::{BedrockConnector, BedrockSink};
