//! Failure taxonomy shared by the HTTP and streaming surfaces.
//!
//! Every component converts its failures into one of these kinds instead of
//! propagating transport errors to the caller. Success is never a kind: it is
//! expressed by `Ok(..)` or by the absence of an error.

use std::fmt;

/// Classification of a failure on either gateway surface.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Certificate path is empty or does not name an existing file.
    InvalidPath,
    /// File exists but the TLS stack rejects it as trust material.
    InvalidCertificate,
    /// Target URL rejected by the caller-supplied validator before any I/O.
    InvalidUrl,
    /// Network-layer failure on an HTTP call (timeout, refused, DNS, ...),
    /// or a streaming loop whose transport closed or errored.
    TransportFailure,
    /// Streaming transport could not be opened or the handshake failed.
    ConnectionFailed,
    /// Remote endpoint rejected the call or returned an undecodable body.
    InvalidRequest,
}

impl ErrorKind {
    /// Returns `true` for configuration/trust problems that retrying cannot fix.
    pub fn is_configuration(self) -> bool {
        matches!(self, Self::InvalidPath | Self::InvalidCertificate | Self::InvalidUrl)
    }

    /// Returns `true` for network-layer problems that may be transient.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::TransportFailure | Self::ConnectionFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::InvalidCertificate => "invalid_certificate",
            Self::InvalidUrl => "invalid_url",
            Self::TransportFailure => "transport_failure",
            Self::ConnectionFailed => "connection_failed",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
