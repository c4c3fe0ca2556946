//! Streaming session state machine.
//!
//! A [`StreamingSession`] owns one websocket transport. [`connect`] walks
//! `Idle -> Connecting -> Open` (or `Failed`), and [`run`] drives two
//! cooperative activities on the open transport until it closes:
//!
//! - the message loop delivers every inbound frame to the listener in order;
//! - the heartbeat loop writes the keepalive token on a fixed interval and
//!   flushes commands queued through a [`SessionHandle`].
//!
//! When either activity ends, the other is told to stop. Each emits one
//! [`SessionEvent::Error`] on exit. Nothing reconnects automatically.
//!
//! [`connect`]: StreamingSession::connect
//! [`run`]: StreamingSession::run

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::certificate::{CertificateProvider, CertificateStatus, FileCertificateProvider};
use crate::error::ErrorKind;
use crate::stream::client::{self, Inbound, Transport, TransportError};
use crate::stream::proto::{ClientCommand, DEFAULT_HEARTBEAT_TOKEN};

/// Default streaming endpoint of a local gateway.
pub const DEFAULT_STREAM_URL: &str = "wss://localhost:5000/v1/api/ws";
/// Default certificate file, relative to the working directory.
pub const DEFAULT_CERTIFICATE_PATH: &str = "keytest_public.pem";
/// Keepalive period used when none is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Returns `true` for absolute `ws://` or `wss://` URLs with a host.
pub fn is_websocket_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "ws" | "wss")
                && parsed.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// Streaming session settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub url: String,
    /// PEM or DER file the gateway's certificate must chain to.
    pub certificate_path: PathBuf,
    /// Keepalive period. Zero disables the keepalive frame, as does a period
    /// too long to schedule. Queued commands are still written.
    pub heartbeat_interval: Duration,
    pub heartbeat_token: String,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>, certificate_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            certificate_path: certificate_path.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_token: DEFAULT_HEARTBEAT_TOKEN.to_string(),
        }
    }

    /// Overrides the keepalive period.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Overrides the keepalive frame text.
    pub fn with_heartbeat_token(mut self, token: impl Into<String>) -> Self {
        self.heartbeat_token = token.into();
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_URL, DEFAULT_CERTIFICATE_PATH)
    }
}

/// Lifecycle of a [`StreamingSession`].
///
/// A transport is held only while the state is `Open`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Connect failed or the transport broke while running.
    Failed,
    /// Closed on request.
    Closed,
}

impl ConnectionState {
    /// Lowercase name used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two concurrent activities of a running session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SessionActivity {
    Messages,
    Heartbeat,
}

impl fmt::Display for SessionActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages => f.write_str("messages"),
            Self::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Reported once by each activity when it stops.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{activity} loop stopped ({kind}): {detail}")]
pub struct LoopError {
    pub activity: SessionActivity,
    pub kind: ErrorKind,
    pub detail: String,
}

impl LoopError {
    fn transport(activity: SessionActivity, detail: impl Into<String>) -> Self {
        Self {
            activity,
            kind: ErrorKind::TransportFailure,
            detail: detail.into(),
        }
    }
}

/// Notification delivered to a [`SessionListener`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// Transport opened; carries the gateway's confirmation frame.
    Connected(String),
    /// One inbound frame, in arrival order.
    Message(String),
    /// An activity stopped.
    Error(LoopError),
}

/// Receives session notifications.
///
/// Callbacks run on the session's own task and should return quickly. Every
/// hook defaults to a no-op; override [`on_event`](Self::on_event) to take
/// the events as one stream instead.
pub trait SessionListener: Send + Sync {
    fn on_connect(&self, _confirmation: &str) {}

    fn on_message(&self, _payload: &str) {}

    fn on_error(&self, _error: &LoopError) {}

    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected(confirmation) => self.on_connect(&confirmation),
            SessionEvent::Message(payload) => self.on_message(&payload),
            SessionEvent::Error(error) => self.on_error(&error),
        }
    }
}

/// Ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}

/// Forwards events into a channel. Send failures are ignored.
impl SessionListener for mpsc::UnboundedSender<SessionEvent> {
    fn on_event(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("stream url rejected: {0}")]
    InvalidUrl(String),

    #[error("certificate at {path:?} unusable: {status:?}")]
    InvalidCertificate {
        path: PathBuf,
        status: CertificateStatus,
    },

    #[error("stream connection failed: {0}")]
    ConnectionFailed(#[source] TransportError),

    #[error("session is already open")]
    AlreadyOpen,
}

impl ConnectError {
    /// Shared error kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::InvalidCertificate { .. } => ErrorKind::InvalidCertificate,
            Self::ConnectionFailed(_) | Self::AlreadyOpen => ErrorKind::ConnectionFailed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is not open (state: {0})")]
    NotConnected(ConnectionState),

    #[error("command queue closed")]
    SendQueueClosed,
}

/// Cloneable control handle for a [`StreamingSession`].
///
/// Commands are queued and written by the heartbeat activity in order once
/// the session runs. [`close`](Self::close) stops a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Queues `command` for the writer.
    pub fn send(&self, command: ClientCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::SendQueueClosed)
    }

    /// Queues a frame that is written verbatim.
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), SessionError> {
        self.send(ClientCommand::Raw(frame.into()))
    }

    /// Queues a market data subscription for `conid`.
    pub fn subscribe_market_data<I, S>(&self, conid: u64, fields: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(ClientCommand::subscribe_market_data(conid, fields))
    }

    /// Queues cancellation of the `conid` subscription.
    pub fn unsubscribe_market_data(&self, conid: u64) -> Result<(), SessionError> {
        self.send(ClientCommand::UnsubscribeMarketData { conid })
    }

    /// Asks both activities of a running session to stop.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns `true` once [`close`](Self::close) was requested.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Websocket session with a message activity and a heartbeat activity.
pub struct StreamingSession {
    config: StreamConfig,
    listener: Arc<dyn SessionListener>,
    certificates: Arc<dyn CertificateProvider>,
    state: ConnectionState,
    transport: Option<Transport>,
    commands_tx: mpsc::UnboundedSender<ClientCommand>,
    commands_rx: mpsc::UnboundedReceiver<ClientCommand>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl StreamingSession {
    /// Creates an idle session that reads certificates from disk.
    pub fn new(config: StreamConfig, listener: Arc<dyn SessionListener>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            listener,
            certificates: Arc::new(FileCertificateProvider),
            state: ConnectionState::Idle,
            transport: None,
            commands_tx,
            commands_rx,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Replaces the source of trust material used by `connect`.
    pub fn with_certificate_provider(mut self, provider: Arc<dyn CertificateProvider>) -> Self {
        self.certificates = provider;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Control handle sharing this session's command queue and close signal.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Opens the transport without URL validation.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        self.connect_validated(|_| true).await
    }

    /// Opens the transport after `validator` accepts the configured URL.
    ///
    /// A rejected URL fails before the certificate is loaded. On success the
    /// listener receives [`SessionEvent::Connected`] with the first frame the
    /// gateway sent.
    pub async fn connect_validated<V>(&mut self, validator: V) -> Result<(), ConnectError>
    where
        V: FnOnce(&str) -> bool,
    {
        if self.state == ConnectionState::Open {
            return Err(ConnectError::AlreadyOpen);
        }
        self.transition(ConnectionState::Connecting);

        if !validator(self.config.url.as_str()) {
            warn!(event = "stream_url_rejected", url = %self.config.url);
            self.transition(ConnectionState::Failed);
            return Err(ConnectError::InvalidUrl(self.config.url.clone()));
        }

        let certificate = self.certificates.obtain(&self.config.certificate_path);
        let status = certificate.status();
        let Ok(trust) = certificate.into_trust() else {
            warn!(
                event = "stream_certificate_unusable",
                path = %self.config.certificate_path.display(),
                status = ?status
            );
            self.transition(ConnectionState::Failed);
            return Err(ConnectError::InvalidCertificate {
                path: self.config.certificate_path.clone(),
                status,
            });
        };

        let mut socket = match client::open_transport(&self.config.url, &trust).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(event = "stream_connect_failed", url = %self.config.url, error = %err);
                self.transition(ConnectionState::Failed);
                return Err(ConnectError::ConnectionFailed(err));
            }
        };

        let confirmation = match client::recv_confirmation(&mut socket).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                warn!(event = "stream_handshake_failed", url = %self.config.url, error = %err);
                let _ = socket.close(None).await;
                self.transition(ConnectionState::Failed);
                return Err(ConnectError::ConnectionFailed(err));
            }
        };

        self.transport = Some(socket);
        self.shutdown.send_replace(false);
        self.transition(ConnectionState::Open);
        self.listener.on_event(SessionEvent::Connected(confirmation));
        Ok(())
    }

    /// Runs the message and heartbeat activities until the transport closes.
    ///
    /// Returns the terminal state: `Closed` after [`SessionHandle::close`],
    /// `Failed` when the transport broke.
    pub async fn run(&mut self) -> Result<ConnectionState, SessionError> {
        let socket = match (self.state, self.transport.take()) {
            (ConnectionState::Open, Some(socket)) => socket,
            (state, transport) => {
                self.transport = transport;
                return Err(SessionError::NotConnected(state));
            }
        };
        info!(event = "session_running", url = %self.config.url);

        let (sink, stream) = socket.split();
        let listener = self.listener.as_ref();
        let (messages, (heartbeat, mut sink)) = tokio::join!(
            message_loop(stream, listener, &self.shutdown),
            heartbeat_loop(
                sink,
                &mut self.commands_rx,
                self.config.heartbeat_interval,
                &self.config.heartbeat_token,
                listener,
                &self.shutdown,
            ),
        );
        let _ = sink.close().await;

        let terminal = if messages == LoopExit::Stopped && heartbeat == LoopExit::Stopped {
            ConnectionState::Closed
        } else {
            ConnectionState::Failed
        };
        self.transition(terminal);
        Ok(terminal)
    }

    /// Closes an open transport that is not running.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(mut socket) = self.transport.take() {
            let _ = socket.close(None).await;
        }
        if self.state == ConnectionState::Open {
            self.transition(ConnectionState::Closed);
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        debug!(event = "session_state", from = %self.state, to = %to);
        self.state = to;
    }
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("url", &self.config.url)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// How an activity ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LoopExit {
    /// Observed the shutdown signal.
    Stopped,
    /// Transport closed or errored under this activity.
    Broken,
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn finish(
    activity: SessionActivity,
    exit: LoopExit,
    detail: String,
    listener: &dyn SessionListener,
    shutdown: &watch::Sender<bool>,
) -> LoopExit {
    match exit {
        LoopExit::Stopped => debug!(event = "session_loop_stopped", activity = %activity),
        LoopExit::Broken => {
            warn!(event = "session_loop_failed", activity = %activity, detail = %detail);
            shutdown.send_replace(true);
        }
    }
    listener.on_event(SessionEvent::Error(LoopError::transport(activity, detail)));
    exit
}

async fn message_loop<S>(
    mut stream: S,
    listener: &dyn SessionListener,
    shutdown: &watch::Sender<bool>,
) -> LoopExit
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut shutdown_rx = shutdown.subscribe();
    let (exit, detail) = loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                break (LoopExit::Stopped, "transport closed".to_string());
            }
            next = stream.next() => match client::classify_inbound(next) {
                Inbound::Frame(text) => listener.on_event(SessionEvent::Message(text)),
                Inbound::Skip => {}
                Inbound::Ended(detail) => break (LoopExit::Broken, detail),
            },
        }
    };
    finish(SessionActivity::Messages, exit, detail, listener, shutdown)
}

async fn heartbeat_loop<S>(
    mut sink: S,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    interval: Duration,
    token: &str,
    listener: &dyn SessionListener,
    shutdown: &watch::Sender<bool>,
) -> (LoopExit, S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut shutdown_rx = shutdown.subscribe();
    let mut ticker = if interval.is_zero() {
        None
    } else {
        Instant::now().checked_add(interval).map(|start| {
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        })
    };
    if ticker.is_none() {
        debug!(event = "heartbeat_disabled", interval_sec = interval.as_secs());
    }

    let (exit, detail) = loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                break (LoopExit::Stopped, "transport closed".to_string());
            }
            _ = next_tick(&mut ticker) => {
                if let Err(err) = sink.send(Message::Text(token.to_string())).await {
                    break (LoopExit::Broken, format!("heartbeat write failed: {err}"));
                }
                debug!(event = "heartbeat_sent");
            }
            Some(command) = commands.recv() => {
                let frame = match command.to_text() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(event = "command_encode_failed", command = ?command, error = %err);
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    break (LoopExit::Broken, format!("command write failed: {err}"));
                }
                debug!(event = "command_sent", command = ?command);
            }
        }
    };
    (
        finish(SessionActivity::Heartbeat, exit, detail, listener, shutdown),
        sink,
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::certificate::CertificateResult;

    #[test]
    fn websocket_url_check() {
        assert!(is_websocket_url("wss://localhost:5000/v1/api/ws"));
        assert!(is_websocket_url("ws://127.0.0.1:8080/"));
        assert!(!is_websocket_url("https://localhost:5000/v1/api/ws"));
        assert!(!is_websocket_url("localhost:5000"));
        assert!(!is_websocket_url(""));
    }

    #[test]
    fn default_config_targets_local_gateway() {
        let config = StreamConfig::default();
        assert_eq!(config.url, DEFAULT_STREAM_URL);
        assert_eq!(config.certificate_path, Path::new("keytest_public.pem"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.heartbeat_token, "tic");
    }

    #[test]
    fn listener_hooks_receive_dispatched_events() {
        #[derive(Default)]
        struct Counting {
            connects: AtomicUsize,
            messages: AtomicUsize,
            errors: AtomicUsize,
        }

        impl SessionListener for Counting {
            fn on_connect(&self, _confirmation: &str) {
                self.connects.fetch_add(1, Ordering::SeqCst);
            }

            fn on_message(&self, _payload: &str) {
                self.messages.fetch_add(1, Ordering::SeqCst);
            }

            fn on_error(&self, _error: &LoopError) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        let listener = Counting::default();
        listener.on_event(SessionEvent::Connected("ok".to_string()));
        listener.on_event(SessionEvent::Message("m1".to_string()));
        listener.on_event(SessionEvent::Message("m2".to_string()));
        listener.on_event(SessionEvent::Error(LoopError::transport(
            SessionActivity::Messages,
            "gone",
        )));

        assert_eq!(listener.connects.load(Ordering::SeqCst), 1);
        assert_eq!(listener.messages.load(Ordering::SeqCst), 2);
        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_url_skips_certificate_lookup() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lookups);
        let provider = move |_: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            CertificateResult::invalid_path()
        };

        let mut session = StreamingSession::new(StreamConfig::default(), Arc::new(NoopListener))
            .with_certificate_provider(Arc::new(provider));
        let err = session
            .connect_validated(|_| false)
            .await
            .expect_err("validator rejects");

        assert!(matches!(err, ConnectError::InvalidUrl(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_certificate_fails_before_io() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = StreamConfig::new("wss://localhost:1/ws", "/nonexistent/cert.pem");
        let mut session = StreamingSession::new(config, Arc::new(tx));

        let err = session.connect().await.expect_err("no certificate");
        assert!(matches!(
            err,
            ConnectError::InvalidCertificate {
                status: CertificateStatus::InvalidPath,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidCertificate);
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_requires_open_session() {
        let mut session = StreamingSession::new(StreamConfig::default(), Arc::new(NoopListener));
        assert_eq!(
            session.run().await,
            Err(SessionError::NotConnected(ConnectionState::Idle))
        );
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[test]
    fn handle_close_is_shared_across_clones() {
        let session = StreamingSession::new(StreamConfig::default(), Arc::new(NoopListener));
        let handle = session.handle();
        let clone = handle.clone();
        assert!(!handle.is_closed());
        clone.close();
        assert!(handle.is_closed());
        handle
            .subscribe_market_data(265598, ["31"])
            .expect("queue stays open while the session lives");
    }
}
