//! Error types for switchboard-live.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised at the fallible edges of the live pipeline.
///
/// Routing and throttling never fail: they classify and return an outcome.
/// Errors only come from loading configuration and from the outbound
/// gateway collaborator.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Configuration value out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A send was attempted with nothing to send.
    #[error("Message is empty")]
    EmptyMessage,

    /// A request needs the gateway connection and there is none.
    #[error("Not connected to the gateway")]
    NotConnected,

    /// The gateway refused or failed a request.
    #[error("Gateway request '{request}' failed: {reason}")]
    Gateway { request: &'static str, reason: String },
}

impl LiveError {
    /// Shorthand for a gateway failure.
    pub fn gateway(request: &'static str, reason: impl Into<String>) -> Self {
        Self::Gateway {
            request,
            reason: reason.into(),
        }
    }
}

/// Result type for live pipeline operations.
pub type Result<T> = std::result::Result<T, LiveError>;
