//! Client-side session manager for a local brokerage web-API gateway.
//!
//! The crate is organized by transport surface:
//! - `http`: request executor for the gateway's REST endpoints.
//! - `endpoints`: session, trade and account endpoint paths.
//! - `stream`: websocket session with heartbeat and command queue.
//! - `certificate`: trust material for the streaming socket.
//! - `watchdog`: periodic background runner used for session keepalive.
//! - `client`: facade tying the surfaces to one configuration.

/// Certificate loading and TLS trust objects.
pub mod certificate;
/// Gateway facade: endpoint calls, keepalive and session factory.
pub mod client;
/// TOML configuration with environment overrides.
pub mod config;
/// Gateway endpoint identifiers.
pub mod endpoints;
/// Shared failure taxonomy.
pub mod error;
/// HTTP request executor and result type.
pub mod http;
/// Subscriber initialisation for applications.
pub mod logging;
/// Streaming transport, protocol frames and session state.
pub mod stream;
/// Periodic task runner with live reconfiguration.
pub mod watchdog;

pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use error::ErrorKind;
