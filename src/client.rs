//! Single entry point for a gateway: HTTP calls, the `/tickle` keepalive
//! watchdog and streaming sessions, all driven by one [`GatewayConfig`].

use std::sync::Arc;

use tracing::debug;

use crate::certificate::{CertificateProvider, FileCertificateProvider};
use crate::config::GatewayConfig;
use crate::endpoints::{Endpoint, Method};
use crate::http::{ClientBuildError, RequestExecutor, RequestResult};
use crate::stream::session::{is_websocket_url, ConnectError, SessionListener, StreamingSession};
use crate::watchdog::{Watchdog, WatchdogError};

/// Name reported by the keepalive watchdog in logs.
pub const KEEPALIVE_WATCHDOG_NAME: &str = "gateway-keepalive";

#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    http: RequestExecutor,
    certificates: Arc<dyn CertificateProvider>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, ClientBuildError> {
        let http = RequestExecutor::with_options(config.base_url.clone(), config.request_options())?;
        Ok(Self {
            config,
            http,
            certificates: Arc::new(FileCertificateProvider),
        })
    }

    /// Client for a gateway running on `localhost:5000` with default settings.
    pub fn local() -> Result<Self, ClientBuildError> {
        Self::new(GatewayConfig::default())
    }

    /// Replaces the certificate source used by new streaming sessions.
    pub fn with_certificate_provider(mut self, provider: Arc<dyn CertificateProvider>) -> Self {
        self.certificates = provider;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.http
    }

    /// Calls `endpoint` with its HTTP method. POST calls carry no body.
    pub async fn request(&self, endpoint: Endpoint) -> RequestResult {
        match endpoint.method() {
            Method::Get => self.http.get(endpoint.path()).await,
            Method::Post => self.http.post(endpoint.path()).await,
        }
    }

    pub async fn ping(&self) -> RequestResult {
        self.request(Endpoint::Ping).await
    }

    pub async fn authentication_status(&self) -> RequestResult {
        self.request(Endpoint::AuthenticationStatus).await
    }

    pub async fn reauthenticate(&self) -> RequestResult {
        self.request(Endpoint::Reauthenticate).await
    }

    pub async fn validate(&self) -> RequestResult {
        self.request(Endpoint::Validate).await
    }

    pub async fn trades(&self) -> RequestResult {
        self.request(Endpoint::Trades).await
    }

    pub async fn brokerage_accounts(&self) -> RequestResult {
        self.request(Endpoint::BrokerageAccounts).await
    }

    /// Watchdog that pings the gateway every `watchdog_interval_sec` to keep
    /// the brokerage session alive.
    ///
    /// A failed ping is logged by the watchdog and retried on the next cycle.
    /// With `watchdog_autostart` the loop is already running on return.
    pub fn keepalive_watchdog(&self) -> Result<Watchdog, WatchdogError> {
        let http = self.http.clone();
        Watchdog::new(KEEPALIVE_WATCHDOG_NAME, self.config.watchdog_config(), move || {
            let http = http.clone();
            async move {
                let result = http.post(Endpoint::Ping.path()).await;
                match result.error() {
                    None => {
                        debug!(event = "keepalive_ok", status = result.http_status());
                        Ok(())
                    }
                    Some(kind) => Err(format!(
                        "{} failed: {kind} (status {})",
                        Endpoint::Ping,
                        result.http_status()
                    )),
                }
            }
        })
    }

    /// Idle streaming session built from the configured URL, certificate and
    /// heartbeat settings.
    pub fn streaming_session(&self, listener: Arc<dyn SessionListener>) -> StreamingSession {
        StreamingSession::new(self.config.stream_config(), listener)
            .with_certificate_provider(Arc::clone(&self.certificates))
    }

    /// Builds a session and connects it, rejecting URLs that are not
    /// `ws://` or `wss://`.
    pub async fn connect_stream(
        &self,
        listener: Arc<dyn SessionListener>,
    ) -> Result<StreamingSession, ConnectError> {
        let mut session = self.streaming_session(listener);
        session.connect_validated(is_websocket_url).await?;
        Ok(session)
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.config.base_url)
            .field("websocket_url", &self.config.websocket_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::GatewayClient;
    use crate::config::GatewayConfig;
    use crate::error::ErrorKind;
    use crate::stream::session::{ConnectError, ConnectionState, NoopListener};

    #[test]
    fn executor_uses_configured_base_url() {
        let client = GatewayClient::local().expect("build client");
        assert_eq!(
            client.executor().endpoint_url("/tickle"),
            "https://localhost:5000/v1/portal/tickle"
        );
    }

    #[test]
    fn sessions_inherit_stream_settings() {
        let config = GatewayConfig {
            websocket_url: "ws://127.0.0.1:9/ws".to_string(),
            heartbeat_token: "ping".to_string(),
            ..GatewayConfig::default()
        };
        let client = GatewayClient::new(config).expect("build client");
        let session = client.streaming_session(Arc::new(NoopListener));

        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.config().url, "ws://127.0.0.1:9/ws");
        assert_eq!(session.config().heartbeat_token, "ping");
    }

    #[tokio::test]
    async fn connect_stream_rejects_non_websocket_urls() {
        let config = GatewayConfig {
            websocket_url: "https://localhost:5000/v1/api/ws".to_string(),
            ..GatewayConfig::default()
        };
        let client = GatewayClient::new(config).expect("build client");

        let err = client
            .connect_stream(Arc::new(NoopListener))
            .await
            .expect_err("https url is not a websocket url");
        assert!(matches!(err, ConnectError::InvalidUrl(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn disabled_keepalive_never_spawns() {
        let config = GatewayConfig {
            watchdog_interval_sec: 0.0,
            watchdog_autostart: false,
            ..GatewayConfig::default()
        };
        let client = GatewayClient::new(config).expect("build client");
        let watchdog = client.keepalive_watchdog().expect("build watchdog");
        assert!(!watchdog.is_running());
        assert_eq!(watchdog.name(), "gateway-keepalive");
    }
}
