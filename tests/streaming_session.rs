mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clientportal_sdk::certificate::CertificateResult;
use clientportal_sdk::error::ErrorKind;
use clientportal_sdk::stream::session::{
    ConnectError, ConnectionState, SessionActivity, SessionEvent, StreamConfig, StreamingSession,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{certificate_file, closed_port, spawn_server};

const CONFIRMATION: &str = r#"{"message":"waiting for session"}"#;

#[derive(Clone)]
struct GatewayScript {
    /// Frames sent after the confirmation.
    frames: Vec<&'static str>,
    /// Skip the confirmation and hang up immediately.
    silent: bool,
    /// Send a close frame after `frames` instead of reading.
    hang_up: bool,
    received: mpsc::UnboundedSender<String>,
}

async fn ws_handler(State(script): State<GatewayScript>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_gateway(socket, script))
}

async fn run_gateway(mut socket: WebSocket, script: GatewayScript) {
    if script.silent {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    if socket
        .send(Message::Text(CONFIRMATION.to_string()))
        .await
        .is_err()
    {
        return;
    }
    for frame in &script.frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    if script.hang_up {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let _ = script.received.send(text);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

struct MockGateway {
    url: String,
    received: mpsc::UnboundedReceiver<String>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

async fn spawn_gateway(frames: Vec<&'static str>, silent: bool, hang_up: bool) -> MockGateway {
    let (received_tx, received) = mpsc::unbounded_channel();
    let script = GatewayScript {
        frames,
        silent,
        hang_up,
        received: received_tx,
    };
    let app = Router::new()
        .route("/v1/api/ws", get(ws_handler))
        .with_state(script);
    let (addr, shutdown, _task) = spawn_server(app).await;
    MockGateway {
        url: format!("ws://{addr}/v1/api/ws"),
        received,
        _shutdown: shutdown,
    }
}

fn session_for(
    url: &str,
    certificate: &Path,
    heartbeat: Duration,
) -> (StreamingSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let config = StreamConfig::new(url, certificate).with_heartbeat_interval(heartbeat);
    (StreamingSession::new(config, Arc::new(events_tx)), events_rx)
}

fn drain_errors(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionActivity> {
    let mut activities = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Error(error) => {
                assert_eq!(error.kind, ErrorKind::TransportFailure);
                activities.push(error.activity);
            }
            other => panic!("unexpected event after shutdown: {other:?}"),
        }
    }
    activities.sort_by_key(|activity| *activity == SessionActivity::Heartbeat);
    activities
}

#[tokio::test]
async fn rejected_url_never_loads_certificate() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lookups);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = StreamingSession::new(StreamConfig::default(), Arc::new(events_tx))
        .with_certificate_provider(Arc::new(move |_: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            CertificateResult::invalid_certificate()
        }));

    let err = session
        .connect_validated(|_| false)
        .await
        .expect_err("validator rejects every url");

    assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert!(events_rx.try_recv().is_err());
}

#[tokio::test]
async fn invalid_certificate_makes_no_connection_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let mut session = StreamingSession::new(
        StreamConfig::new(format!("ws://{addr}/v1/api/ws"), "ignored.pem"),
        Arc::new(events_tx),
    )
    .with_certificate_provider(Arc::new(|_: &Path| CertificateResult::invalid_certificate()));

    let err = session.connect().await.expect_err("certificate rejected");

    assert!(matches!(err, ConnectError::InvalidCertificate { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidCertificate);
    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(
        timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err(),
        "no tcp connection should reach the gateway"
    );
}

#[tokio::test]
async fn refused_connection_fails() {
    let addr = closed_port().await;
    let certificate = certificate_file();
    let (mut session, _events) = session_for(
        &format!("ws://{addr}/v1/api/ws"),
        certificate.path(),
        Duration::from_secs(60),
    );

    let err = timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect_err("nothing listens on the port");

    assert!(matches!(err, ConnectError::ConnectionFailed(_)));
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn missing_confirmation_fails_connect() {
    let gateway = spawn_gateway(Vec::new(), true, false).await;
    let certificate = certificate_file();
    let (mut session, mut events) =
        session_for(&gateway.url, certificate.path(), Duration::from_secs(60));

    let err = timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect_err("gateway hung up before confirming");

    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn delivers_messages_in_order_and_closes_on_request() {
    let gateway = spawn_gateway(vec!["m1", "m2", "m3"], false, false).await;
    let certificate = certificate_file();
    let (mut session, mut events) =
        session_for(&gateway.url, certificate.path(), Duration::from_secs(60));

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("connect to mock gateway");
    assert_eq!(session.state(), ConnectionState::Open);
    assert_eq!(
        events.try_recv().expect("connected event"),
        SessionEvent::Connected(CONFIRMATION.to_string())
    );

    let handle = session.handle();
    let driver = async {
        let mut delivered = Vec::new();
        while delivered.len() < 3 {
            match events.recv().await {
                Some(SessionEvent::Message(text)) => delivered.push(text),
                other => panic!("expected a message, got {other:?}"),
            }
        }
        handle.close();
        delivered
    };

    let (terminal, delivered) = timeout(Duration::from_secs(5), async {
        tokio::join!(session.run(), driver)
    })
    .await
    .expect("session did not stop after close");

    assert_eq!(delivered, ["m1", "m2", "m3"]);
    assert_eq!(terminal, Ok(ConnectionState::Closed));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(
        drain_errors(&mut events),
        [SessionActivity::Messages, SessionActivity::Heartbeat]
    );
}

#[tokio::test]
async fn heartbeat_writes_commands_then_token() {
    let mut gateway = spawn_gateway(Vec::new(), false, false).await;
    let certificate = certificate_file();
    let (mut session, _events) =
        session_for(&gateway.url, certificate.path(), Duration::from_millis(50));

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("connect to mock gateway");

    let handle = session.handle();
    handle
        .subscribe_market_data(265598, ["31", "83"])
        .expect("queue subscribe");

    let received = &mut gateway.received;
    let driver = async {
        let mut frames = Vec::new();
        while !frames.iter().any(|frame| frame == "tic") {
            frames.push(received.recv().await.expect("gateway frame"));
        }
        handle.close();
        frames
    };

    let (terminal, frames) = timeout(Duration::from_secs(5), async {
        tokio::join!(session.run(), driver)
    })
    .await
    .expect("session did not stop after close");

    assert_eq!(terminal, Ok(ConnectionState::Closed));
    assert_eq!(frames[0], r#"smd+265598+{"fields":["31","83"]}"#);
    assert_eq!(frames.last().map(String::as_str), Some("tic"));
}

#[tokio::test]
async fn peer_hang_up_fails_session() {
    let gateway = spawn_gateway(vec!["m1"], false, true).await;
    let certificate = certificate_file();
    let (mut session, mut events) =
        session_for(&gateway.url, certificate.path(), Duration::from_secs(60));

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("connect to mock gateway");

    let terminal = timeout(Duration::from_secs(5), session.run())
        .await
        .expect("session did not notice the hang-up");

    assert_eq!(terminal, Ok(ConnectionState::Failed));
    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Connected(_))));
    assert_eq!(
        events.try_recv().expect("message event"),
        SessionEvent::Message("m1".to_string())
    );
    assert_eq!(
        drain_errors(&mut events),
        [SessionActivity::Messages, SessionActivity::Heartbeat]
    );
}

#[tokio::test]
async fn reconnect_after_close_is_allowed() {
    let gateway = spawn_gateway(Vec::new(), false, false).await;
    let certificate = certificate_file();
    let (mut session, _events) =
        session_for(&gateway.url, certificate.path(), Duration::from_secs(60));

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("first connect");
    assert!(matches!(
        session.connect().await,
        Err(ConnectError::AlreadyOpen)
    ));

    session.close().await;
    assert_eq!(session.state(), ConnectionState::Closed);

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("second connect");
    assert_eq!(session.state(), ConnectionState::Open);
    assert!(!session.handle().is_closed());
}

#[tokio::test]
async fn unschedulable_heartbeat_still_writes_commands() {
    let mut gateway = spawn_gateway(Vec::new(), false, false).await;
    let certificate = certificate_file();
    let (mut session, _events) =
        session_for(&gateway.url, certificate.path(), Duration::from_secs(u64::MAX));

    timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect timed out")
        .expect("connect to mock gateway");

    let handle = session.handle();
    handle.unsubscribe_market_data(265598).expect("queue unsubscribe");

    let received = &mut gateway.received;
    let driver = async {
        let frame = received.recv().await.expect("gateway frame");
        handle.close();
        frame
    };

    let (terminal, frame) = timeout(Duration::from_secs(5), async {
        tokio::join!(session.run(), driver)
    })
    .await
    .expect("session did not stop after close");

    assert_eq!(terminal, Ok(ConnectionState::Closed));
    assert_eq!(frame, "umd+265598+{}");
}
