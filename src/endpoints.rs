//! Gateway HTTP endpoints used for session management and point queries.

use std::fmt;

/// HTTP method an endpoint expects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Endpoint {
    /// Session keepalive.
    Ping,
    /// Current brokerage session status.
    AuthenticationStatus,
    /// Re-authenticate an existing session.
    Reauthenticate,
    /// Validate the SSO session.
    Validate,
    /// Trades for the current and previous six days.
    Trades,
    /// Accounts accessible to the session.
    BrokerageAccounts,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Ping,
        Endpoint::AuthenticationStatus,
        Endpoint::Reauthenticate,
        Endpoint::Validate,
        Endpoint::Trades,
        Endpoint::BrokerageAccounts,
    ];

    /// Path appended to the gateway base URL.
    pub fn path(self) -> &'static str {
        match self {
            Self::Ping => "/tickle",
            Self::AuthenticationStatus => "/iserver/auth/status",
            Self::Reauthenticate => "/iserver/reauthenticate",
            Self::Validate => "/sso/validate",
            Self::Trades => "/iserver/account/trades",
            Self::BrokerageAccounts => "/iserver/accounts",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Self::Ping | Self::AuthenticationStatus | Self::Reauthenticate => Method::Post,
            Self::Validate | Self::Trades | Self::BrokerageAccounts => Method::Get,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
