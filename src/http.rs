//! Request/response client for the gateway HTTP surface.
//!
//! [`RequestExecutor`] joins a configured base URL with endpoint paths and
//! normalises every outcome into a [`RequestResult`]. Transport errors are
//! logged and classified, never returned as `Err`. No retries are performed
//! here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

/// Default gateway base URL; endpoint paths are appended verbatim.
pub const DEFAULT_BASE_URL: &str = "https://localhost:5000/v1/portal";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestDefaults;

impl RequestDefaults {
    pub const TIMEOUT: Duration = Duration::from_secs(10);
}

/// Construction options for [`RequestExecutor`].
#[derive(Clone, Debug)]
pub struct RequestExecutorOptions {
    /// Upper bound for one whole request, connect through body.
    pub timeout: Duration,
    /// Verify the gateway's TLS certificate. Local gateways ship a
    /// self-signed certificate, so this defaults to `false`.
    pub verify_tls: bool,
}

impl Default for RequestExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: RequestDefaults::TIMEOUT,
            verify_tls: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of one HTTP call.
///
/// `payload` is present if and only if there is no error and the status was
/// a success. `http_status` is `0` when no response was received.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestResult {
    error: Option<ErrorKind>,
    http_status: u16,
    payload: Option<Value>,
}

impl RequestResult {
    /// Decoded body of a 2xx response.
    pub fn success(status: StatusCode, payload: Value) -> Self {
        Self {
            error: None,
            http_status: status.as_u16(),
            payload: Some(payload),
        }
    }

    /// Remote rejected the call or its body could not be decoded.
    pub fn invalid_request(status: StatusCode) -> Self {
        Self {
            error: Some(ErrorKind::InvalidRequest),
            http_status: status.as_u16(),
            payload: None,
        }
    }

    /// No response was received.
    pub fn transport_failure() -> Self {
        Self {
            error: Some(ErrorKind::TransportFailure),
            http_status: 0,
            payload: None,
        }
    }

    /// Failure kind, `None` on success.
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Response status, `0` when nothing was received.
    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    /// Decoded JSON body, present only on success.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Returns `true` when the call succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a plain `Result`, dropping the status code.
    pub fn into_payload(self) -> Result<Value, ErrorKind> {
        match (self.error, self.payload) {
            (None, Some(payload)) => Ok(payload),
            (Some(kind), _) => Err(kind),
            (None, None) => Err(ErrorKind::InvalidRequest),
        }
    }
}

/// Stateless GET/POST helper bound to one base URL.
#[derive(Clone, Debug)]
pub struct RequestExecutor {
    http: Client,
    base_url: String,
}

impl RequestExecutor {
    /// Creates an executor with [`RequestExecutorOptions::default`].
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientBuildError> {
        Self::with_options(base_url, RequestExecutorOptions::default())
    }

    /// Creates an executor with explicit timeout and TLS settings.
    pub fn with_options(
        base_url: impl Into<String>,
        options: RequestExecutorOptions,
    ) -> Result<Self, ClientBuildError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .no_proxy()
            .default_headers(headers)
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Base URL every endpoint path is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL concatenated with `endpoint`, without further validation.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// GET `endpoint` and classify the outcome.
    pub async fn get(&self, endpoint: &str) -> RequestResult {
        let url = self.endpoint_url(endpoint);
        let outcome = self.http.get(&url).send().await;
        classify(&url, outcome).await
    }

    /// POST without a body.
    ///
    /// Use [`post_json`](Self::post_json) when the endpoint expects a payload.
    pub async fn post(&self, endpoint: &str) -> RequestResult {
        let url = self.endpoint_url(endpoint);
        let outcome = self.http.post(&url).send().await;
        classify(&url, outcome).await
    }

    /// POST with a JSON-encoded body.
    pub async fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> RequestResult {
        let url = self.endpoint_url(endpoint);
        let outcome = self.http.post(&url).json(body).send().await;
        classify(&url, outcome).await
    }
}

async fn classify(url: &str, outcome: Result<Response, reqwest::Error>) -> RequestResult {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => {
            debug!(
                event = "http_transport_failed",
                url,
                timeout = err.is_timeout(),
                connect = err.is_connect(),
                error = %err
            );
            return RequestResult::transport_failure();
        }
    };

    let status = response.status();
    let result = if !status.is_success() {
        RequestResult::invalid_request(status)
    } else {
        match response.json::<Value>().await {
            Ok(payload) => RequestResult::success(status, payload),
            Err(err) if err.is_timeout() => {
                debug!(event = "http_body_timeout", url, error = %err);
                RequestResult::transport_failure()
            }
            Err(err) => {
                debug!(event = "http_body_undecodable", url, error = %err);
                RequestResult::invalid_request(status)
            }
        }
    };

    debug!(
        event = "http_request_done",
        url,
        status = result.http_status(),
        error = result.error().map(ErrorKind::as_str)
    );
    result
}
