//! Streaming socket modules.
//!
//! - `client`: websocket transport open, confirmation handshake and inbound
//!   frame classification.
//! - `proto`: command frames and the keepalive token.
//! - `session`: connection state machine with message and heartbeat loops.

/// Websocket transport helpers.
pub mod client;
/// Streaming mini-protocol frames.
pub mod proto;
/// Streaming session, listener and control handle.
pub mod session;
