//! Trust material for the streaming socket.
//!
//! A [`CertificateProvider`] turns a file path into a [`CertificateResult`]:
//! either a verified-peer TLS client configuration rooted in the certificates
//! found in the file, or a failure status. Providers never return `Err` and
//! never panic on bad input.
//!
//! Accepted file formats are PEM (one or more `CERTIFICATE` blocks) and a
//! single DER-encoded certificate. A self-signed pair for a local gateway can
//! be produced with:
//!
//! ```text
//! openssl req -x509 -newkey rsa:4096 -keyout key.pem -out public.pem -nodes
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

const PEM_BOUNDARY: &[u8] = b"-----BEGIN ";

/// Outcome classification of a certificate lookup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateStatus {
    Ok,
    /// Path is empty or does not name an existing file.
    InvalidPath,
    /// File exists but does not hold certificates the TLS stack accepts.
    InvalidCertificate,
}

impl CertificateStatus {
    /// Maps a failed status into the shared taxonomy. `Ok` maps to `None`.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            Self::Ok => None,
            Self::InvalidPath => Some(ErrorKind::InvalidPath),
            Self::InvalidCertificate => Some(ErrorKind::InvalidCertificate),
        }
    }
}

/// Immutable TLS client context that requires peers to chain to the loaded
/// certificates.
///
/// Cloning is cheap; clones share the same underlying configuration.
#[derive(Clone)]
pub struct TrustObject {
    config: Arc<ClientConfig>,
    anchors: usize,
}

impl TrustObject {
    /// Builds a verified-peer client configuration from a root store.
    pub fn from_root_store(roots: RootCertStore) -> Result<Self, CertificateError> {
        let anchors = roots.len();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(CertificateError::Tls)?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            anchors,
        })
    }

    /// Returns the shared rustls client configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Number of trust anchors loaded from the certificate file.
    pub fn anchor_count(&self) -> usize {
        self.anchors
    }
}

impl fmt::Debug for TrustObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustObject")
            .field("anchors", &self.anchors)
            .finish_non_exhaustive()
    }
}

/// Result of one certificate lookup.
///
/// A trust object is present if and only if the status is
/// [`CertificateStatus::Ok`]; the constructors are the only way to build one.
#[derive(Clone, Debug)]
pub struct CertificateResult {
    trust: Option<TrustObject>,
    status: CertificateStatus,
}

impl CertificateResult {
    /// Successful lookup carrying `trust`.
    pub fn ok(trust: TrustObject) -> Self {
        Self {
            trust: Some(trust),
            status: CertificateStatus::Ok,
        }
    }

    /// Path is empty or does not name a file.
    pub fn invalid_path() -> Self {
        Self {
            trust: None,
            status: CertificateStatus::InvalidPath,
        }
    }

    /// File content was rejected as trust material.
    pub fn invalid_certificate() -> Self {
        Self {
            trust: None,
            status: CertificateStatus::InvalidCertificate,
        }
    }

    /// Classification of this lookup.
    pub fn status(&self) -> CertificateStatus {
        self.status
    }

    /// Trust object, present only when the status is `Ok`.
    pub fn trust(&self) -> Option<&TrustObject> {
        self.trust.as_ref()
    }

    /// Returns `true` when the status is `Ok`.
    pub fn is_ok(&self) -> bool {
        self.status == CertificateStatus::Ok
    }

    /// Consumes the result, returning the trust object or the failure kind.
    pub fn into_trust(self) -> Result<TrustObject, ErrorKind> {
        match (self.trust, self.status.error_kind()) {
            (Some(trust), None) => Ok(trust),
            (_, Some(kind)) => Err(kind),
            (None, None) => Err(ErrorKind::InvalidCertificate),
        }
    }
}

impl From<Result<TrustObject, CertificateError>> for CertificateResult {
    fn from(result: Result<TrustObject, CertificateError>) -> Self {
        match result {
            Ok(trust) => Self::ok(trust),
            Err(err) if err.kind() == ErrorKind::InvalidPath => Self::invalid_path(),
            Err(_) => Self::invalid_certificate(),
        }
    }
}

/// Detailed reason a certificate file could not be turned into trust.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate path does not name a file: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read certificate file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed PEM in {path:?}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("certificate in {path:?} rejected: {source}")]
    Rejected {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("tls configuration error: {0}")]
    Tls(rustls::Error),
}

impl CertificateError {
    /// Maps the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Read { .. } => ErrorKind::InvalidPath,
            Self::Pem { .. } | Self::NoCertificates(_) | Self::Rejected { .. } | Self::Tls(_) => {
                ErrorKind::InvalidCertificate
            }
        }
    }
}

/// Source of trust material for a connect attempt.
///
/// Implementations must not panic and must classify every failure into the
/// returned [`CertificateResult`].
pub trait CertificateProvider: Send + Sync {
    /// Resolves `path` into trust material or a failure status.
    fn obtain(&self, path: &Path) -> CertificateResult;
}

impl<F> CertificateProvider for F
where
    F: Fn(&Path) -> CertificateResult + Send + Sync,
{
    fn obtain(&self, path: &Path) -> CertificateResult {
        self(path)
    }
}

/// Reads certificates from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCertificateProvider;

impl CertificateProvider for FileCertificateProvider {
    fn obtain(&self, path: &Path) -> CertificateResult {
        let loaded = load_trust(path);
        match &loaded {
            Ok(trust) => debug!(
                event = "certificate_loaded",
                path = %path.display(),
                anchors = trust.anchor_count()
            ),
            Err(err) => debug!(
                event = "certificate_rejected",
                path = %path.display(),
                kind = %err.kind(),
                error = %err
            ),
        }
        loaded.into()
    }
}

/// Loads every certificate in `path` into a verified-peer trust object.
pub fn load_trust(path: &Path) -> Result<TrustObject, CertificateError> {
    if path.as_os_str().is_empty() || !path.is_file() {
        return Err(CertificateError::NotFound(path.to_path_buf()));
    }

    let raw = std::fs::read(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = parse_certificates(&raw).map_err(|source| CertificateError::Pem {
        path: path.to_path_buf(),
        source,
    })?;
    if certs.is_empty() {
        return Err(CertificateError::NoCertificates(path.to_path_buf()));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert).map_err(|source| CertificateError::Rejected {
            path: path.to_path_buf(),
            source,
        })?;
    }

    TrustObject::from_root_store(roots)
}

fn parse_certificates(raw: &[u8]) -> Result<Vec<CertificateDer<'static>>, io::Error> {
    if !raw.windows(PEM_BOUNDARY.len()).any(|w| w == PEM_BOUNDARY) {
        return Ok(vec![CertificateDer::from(raw.to_vec())]);
    }

    let mut reader = raw;
    rustls_pemfile::certs(&mut reader).collect()
}
