//! Error types for tlspol

use thiserror::Error;

/// Main error type for tlspol
///
/// Failures inside the policy evaluators are recovered into verdicts and
/// never surface as this type; `Error` covers everything around the engine:
/// configuration, the cache backend, the socketmap protocol and startup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for tlspol
pub type Result<T> = std::result::Result<T, Error>;
