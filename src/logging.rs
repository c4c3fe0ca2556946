//! `tracing-subscriber` setup for binaries and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. `RUST_LOG` wins over the supplied default
//! directive.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directive used by the demos.
pub const DEFAULT_DIRECTIVE: &str = "clientportal_sdk=info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log directive: {0}")]
    InvalidDirective(#[from] ParseError),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs a human-readable subscriber.
pub fn init(default_directive: &str) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

/// Installs a JSON-lines subscriber.
pub fn init_json(default_directive: &str) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive)?)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

fn env_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_directive)?),
    }
}

#[cfg(test)]
mod tests {
    use super::{init, init_json, LoggingError, DEFAULT_DIRECTIVE};

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _ = init(DEFAULT_DIRECTIVE);
        assert!(matches!(
            init_json(DEFAULT_DIRECTIVE),
            Err(LoggingError::AlreadyInitialized)
        ));
    }

    #[test]
    fn rejects_malformed_default_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            super::env_filter("clientportal_sdk=loud"),
            Err(LoggingError::InvalidDirective(_))
        ));
    }
}
