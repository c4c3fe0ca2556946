//! Low-level websocket transport for the streaming surface.
//!
//! Opens the socket with a certificate-derived rustls connector, reads the
//! gateway's confirmation frame and classifies inbound frames. The session
//! layer owns the resulting transport exclusively.

use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::certificate::TrustObject;

/// Live streaming connection.
pub(crate) type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors produced while opening the transport or reading the handshake.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket or TLS layer error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Socket ended before the confirmation frame arrived.
    #[error("handshake error: {0}")]
    Handshake(String),
}

/// What the session should do with one poll of the inbound stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// Deliver this payload.
    Frame(String),
    /// Control frame handled by the websocket layer.
    Skip,
    /// Transport closed or errored.
    Ended(String),
}

/// Opens the socket. TLS peers must chain to `trust`; plain `ws://` URLs
/// skip TLS entirely.
pub(crate) async fn open_transport(url: &str, trust: &TrustObject) -> Result<Transport, TransportError> {
    let request = url.into_client_request()?;
    let connector = Connector::Rustls(trust.client_config());
    let (socket, response) =
        connect_async_tls_with_config(request, None, false, Some(connector)).await?;
    debug!(
        event = "stream_transport_open",
        url,
        status = response.status().as_u16()
    );
    Ok(socket)
}

/// Reads the gateway's first data frame.
pub(crate) async fn recv_confirmation(socket: &mut Transport) -> Result<String, TransportError> {
    loop {
        match classify_inbound(socket.next().await) {
            Inbound::Frame(text) => return Ok(text),
            Inbound::Skip => {}
            Inbound::Ended(detail) => {
                return Err(TransportError::Handshake(format!(
                    "{detail} before confirmation"
                )));
            }
        }
    }
}

pub(crate) fn classify_inbound(next: Option<Result<Message, WsError>>) -> Inbound {
    match next {
        Some(Ok(Message::Text(text))) => Inbound::Frame(text),
        // The gateway sends some JSON payloads as binary frames.
        Some(Ok(Message::Binary(bytes))) => {
            Inbound::Frame(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Inbound::Skip,
        Some(Ok(Message::Close(Some(frame)))) => {
            Inbound::Ended(format!("closed by peer ({}): {}", frame.code, frame.reason))
        }
        Some(Ok(Message::Close(None))) => Inbound::Ended("closed by peer".to_string()),
        Some(Err(err)) => Inbound::Ended(format!("websocket error: {err}")),
        None => Inbound::Ended("socket ended".to_string()),
    }
}
